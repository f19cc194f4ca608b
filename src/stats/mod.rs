//! Trace analysis
//!
//! Aggregates a recorded trace into the numbers people actually ask for:
//! step totals, hot addresses, mnemonic frequency, and the call/return mix.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::storage::{InsnKind, TraceDb};

/// How many mnemonics the frequency table keeps
const TOP_MNEMONICS: usize = 20;

/// One row of the mnemonic frequency table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MnemonicCount {
    /// Decoded mnemonic
    pub mnemonic: String,
    /// Times it was executed
    pub count: usize,
}

/// The single most-executed address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotSpot {
    /// Address of the instruction
    pub pc: u64,
    /// Times it was executed
    pub count: usize,
}

/// Aggregate view of one trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStats {
    /// Total recorded steps
    pub total_steps: usize,
    /// Distinct addresses executed
    pub unique_pcs: usize,
    /// Deepest call depth reached, relative to the attach point
    pub max_depth: u32,
    /// Instructions classified as calls
    pub calls: usize,
    /// Instructions classified as returns
    pub rets: usize,
    /// Instructions classified as jumps
    pub jumps: usize,
    /// Most-executed address; ties resolve to the lowest address
    pub hottest: Option<HotSpot>,
    /// Mnemonic frequency table, most frequent first
    pub top_mnemonics: Vec<MnemonicCount>,
}

impl TraceStats {
    /// Compute stats over everything in `db`
    #[must_use]
    pub fn analyze(db: &TraceDb) -> Self {
        let entries = db.get_all();

        let mut pc_counts: BTreeMap<u64, usize> = BTreeMap::new();
        let mut mnemonic_counts: HashMap<String, usize> = HashMap::new();
        let mut calls = 0;
        let mut rets = 0;
        let mut jumps = 0;
        let mut max_depth = 0;

        for entry in &entries {
            *pc_counts.entry(entry.pc).or_default() += 1;
            *mnemonic_counts.entry(entry.mnemonic.clone()).or_default() += 1;
            match entry.kind {
                InsnKind::Call => calls += 1,
                InsnKind::Ret => rets += 1,
                InsnKind::Jump => jumps += 1,
                InsnKind::Other => {}
            }
            max_depth = max_depth.max(entry.depth);
        }

        let unique_pcs = pc_counts.len();
        let hottest = pc_counts
            .iter()
            .max_by(|(pc_a, count_a), (pc_b, count_b)| {
                count_a.cmp(count_b).then_with(|| pc_b.cmp(pc_a))
            })
            .map(|(pc, count)| HotSpot {
                pc: *pc,
                count: *count,
            });

        let mut top_mnemonics: Vec<MnemonicCount> = mnemonic_counts
            .into_iter()
            .map(|(mnemonic, count)| MnemonicCount { mnemonic, count })
            .collect();
        top_mnemonics.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.mnemonic.cmp(&b.mnemonic))
        });
        top_mnemonics.truncate(TOP_MNEMONICS);

        Self {
            total_steps: entries.len(),
            unique_pcs,
            max_depth,
            calls,
            rets,
            jumps,
            hottest,
            top_mnemonics,
        }
    }

    /// Render the stats as a plain-text report
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Trace Summary ===\n");
        out.push_str(&format!("total steps:    {}\n", self.total_steps));
        out.push_str(&format!("unique pcs:     {}\n", self.unique_pcs));
        out.push_str(&format!("max call depth: {}\n", self.max_depth));
        out.push_str(&format!(
            "calls: {}  rets: {}  jumps: {}\n",
            self.calls, self.rets, self.jumps
        ));
        match &self.hottest {
            Some(hot) => out.push_str(&format!(
                "hottest pc:     {:#x} ({} hits)\n",
                hot.pc, hot.count
            )),
            None => out.push_str("hottest pc:     -\n"),
        }

        if !self.top_mnemonics.is_empty() {
            out.push_str("\ntop mnemonics:\n");
            for row in &self.top_mnemonics {
                out.push_str(&format!("  {:<10} {:>8}\n", row.mnemonic, row.count));
            }
        }
        out
    }
}
