// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Kernel Settings
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Problem dimensions and tunable sizes for one rank.
//!
//! Settings can be loaded from JSON, set programmatically, or patched
//! from an embedded command-line string. Recognized options are consumed
//! and everything else is handed back to the caller untouched.

use crate::error::{StencilError, StencilResult};
use crate::idx::{DimSet, IdxTuple};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Number of scalar lanes in one vector fold of the unit-stride dim.
pub const VLEN: usize = 8;

/// Default block size per domain dim when none is given.
pub const DEF_BLOCK_SIZE: i64 = 32;

/// Problem dimensions: one optional step dim, ordered domain dims, and
/// ordered misc dims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dims {
    pub step_dim: String,
    pub domain_dims: DimSet,
    pub misc_dims: DimSet,
}

impl Dims {
    pub fn new<S: Into<String>>(
        step_dim: S,
        domain_dims: impl IntoIterator<Item = S>,
        misc_dims: impl IntoIterator<Item = S>,
    ) -> Self {
        Dims {
            step_dim: step_dim.into(),
            domain_dims: DimSet::new(domain_dims),
            misc_dims: DimSet::new(misc_dims),
        }
    }

    pub fn num_domain_dims(&self) -> usize {
        self.domain_dims.len()
    }

    /// The unit-stride dim is the innermost (last) domain dim.
    pub fn inner_dim(&self) -> &str {
        self.domain_dims.name(self.domain_dims.len() - 1)
    }

    pub fn is_domain_dim(&self, name: &str) -> bool {
        self.domain_dims.contains(name)
    }

    /// Vector fold per domain dim: `VLEN` in the unit-stride dim, 1
    /// elsewhere.
    pub fn fold_tuple(&self) -> IdxTuple {
        let mut t = IdxTuple::filled(&self.domain_dims, 1);
        t.set(self.inner_dim(), VLEN as i64);
        t
    }

    /// Cluster per domain dim: the unit of fused vector work. This
    /// build fuses one vector per cluster.
    pub fn cluster_tuple(&self) -> IdxTuple {
        self.fold_tuple()
    }

    /// Guard used by per-dim setters: unknown domain dim is a config
    /// error carrying the caller's name.
    pub fn check_domain_dim(&self, name: &str, fn_name: &str) -> StencilResult<usize> {
        self.domain_dims.posn(name).ok_or_else(|| {
            StencilError::ConfigInvalid(format!("{fn_name}: unknown domain dimension '{name}'"))
        })
    }
}

/// NUMA placement preference for grid allocations.
///
/// `NoBinding` performs aligned allocation only; see the allocator for
/// how the other preferences degrade on hosts without a policy library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", from = "i64")]
pub enum NumaPref {
    Node(u32),
    Local,
    Interleave,
    NoBinding,
}

impl NumaPref {
    pub const LOCAL_CODE: i64 = -1;
    pub const INTERLEAVE_CODE: i64 = -2;
    pub const NONE_CODE: i64 = -9;
}

impl From<NumaPref> for i64 {
    fn from(p: NumaPref) -> i64 {
        match p {
            NumaPref::Node(n) => n as i64,
            NumaPref::Local => NumaPref::LOCAL_CODE,
            NumaPref::Interleave => NumaPref::INTERLEAVE_CODE,
            NumaPref::NoBinding => NumaPref::NONE_CODE,
        }
    }
}

impl From<i64> for NumaPref {
    fn from(code: i64) -> NumaPref {
        match code {
            n if n >= 0 => NumaPref::Node(n as u32),
            NumaPref::LOCAL_CODE => NumaPref::Local,
            NumaPref::INTERLEAVE_CODE => NumaPref::Interleave,
            _ => NumaPref::NoBinding,
        }
    }
}

/// On-line auto-tuner parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunerSettings {
    pub enabled: bool,
    pub warmup_steps: i64,
    pub warmup_secs: f64,
    pub min_steps: i64,
    pub min_secs: f64,
    pub min_step: i64,
    pub max_radius: i64,
    pub min_pts: i64,
    pub min_blks: i64,
}

impl Default for TunerSettings {
    fn default() -> Self {
        TunerSettings {
            enabled: false,
            warmup_steps: 100,
            warmup_secs: 1.0,
            min_steps: 50,
            min_secs: 0.1,
            min_step: 4,
            max_radius: 64,
            min_pts: 512,
            min_blks: 4,
        }
    }
}

/// All tunable sizes and switches for one rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSettings {
    pub dims: Dims,

    // Per-domain-dim sizes; 0 means "derive a default in adjust()".
    pub rank_domain_size: IdxTuple,
    pub min_pad_size: IdxTuple,
    pub region_size: IdxTuple,
    pub block_size: IdxTuple,
    pub sub_block_size: IdxTuple,
    pub num_ranks: IdxTuple,

    // Threading.
    pub max_threads: usize,
    pub thread_divisor: usize,
    pub num_block_threads: usize,

    // Temporal blocking depth; 1 disables wave-fronts.
    pub wf_depth: usize,

    // Halo-exchange switches.
    pub enable_halo_exchange: bool,
    pub allow_vec_exchange: bool,

    pub numa_pref: NumaPref,
    pub tuner: TunerSettings,
}

impl KernelSettings {
    pub fn new(dims: Dims) -> Self {
        let dd = dims.domain_dims.clone();
        KernelSettings {
            dims,
            rank_domain_size: IdxTuple::filled(&dd, 64),
            min_pad_size: IdxTuple::filled(&dd, 0),
            region_size: IdxTuple::filled(&dd, 0),
            block_size: IdxTuple::filled(&dd, 0),
            sub_block_size: IdxTuple::filled(&dd, 0),
            num_ranks: IdxTuple::filled(&dd, 1),
            max_threads: 0,
            thread_divisor: 1,
            num_block_threads: 1,
            wf_depth: 1,
            enable_halo_exchange: true,
            allow_vec_exchange: true,
            numa_pref: NumaPref::NoBinding,
            tuner: TunerSettings::default(),
        }
    }

    /// Load from a JSON file.
    pub fn from_file(path: &str) -> StencilResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    /// Derive unset sizes and enforce level-below multiples:
    /// cluster ≤ sub-block ≤ block ≤ region ≤ rank domain, each level
    /// rounded up to a multiple of the one below.
    pub fn adjust(&mut self) -> StencilResult<()> {
        for (i, name) in self.dims.domain_dims.clone().names().enumerate() {
            if self.rank_domain_size.at(i) < 1 {
                return Err(StencilError::ConfigInvalid(format!(
                    "rank domain size in '{name}' must be positive, got {}",
                    self.rank_domain_size.at(i)
                )));
            }
            if self.num_ranks.at(i) < 1 {
                return Err(StencilError::ConfigInvalid(format!(
                    "number of ranks in '{name}' must be positive, got {}",
                    self.num_ranks.at(i)
                )));
            }
            if self.min_pad_size.at(i) < 0 {
                return Err(StencilError::ConfigInvalid(format!(
                    "min pad size in '{name}' must be non-negative, got {}",
                    self.min_pad_size.at(i)
                )));
            }
        }
        if self.wf_depth < 1 {
            return Err(StencilError::ConfigInvalid(format!(
                "wave-front depth must be >= 1, got {}",
                self.wf_depth
            )));
        }
        self.thread_divisor = self.thread_divisor.max(1);
        self.num_block_threads = self.num_block_threads.max(1);

        let cluster = self.dims.cluster_tuple();

        // Block: default, then cluster multiple.
        for i in 0..self.block_size.len() {
            if self.block_size.at(i) == 0 {
                self.block_size
                    .set_at(i, self.rank_domain_size.at(i).min(DEF_BLOCK_SIZE));
            }
        }
        self.block_size = self.block_size.round_up_to(&cluster);

        // Sub-block: one cluster in the unit-stride dim, whole block
        // elsewhere, then cluster multiple, then cap at block.
        let inner = self
            .dims
            .domain_dims
            .posn(self.dims.inner_dim())
            .expect("inner dim is a domain dim");
        for i in 0..self.sub_block_size.len() {
            if self.sub_block_size.at(i) == 0 {
                let def = if i == inner {
                    cluster.at(i)
                } else {
                    self.block_size.at(i)
                };
                self.sub_block_size.set_at(i, def);
            }
        }
        self.sub_block_size = self
            .sub_block_size
            .round_up_to(&cluster)
            .min(&self.block_size);

        // Block becomes a sub-block multiple.
        self.block_size = self.block_size.round_up_to(&self.sub_block_size);

        // Region: default to the whole rank domain, then block multiple.
        for i in 0..self.region_size.len() {
            if self.region_size.at(i) == 0 {
                self.region_size.set_at(i, self.rank_domain_size.at(i));
            }
        }
        self.region_size = self.region_size.round_up_to(&self.block_size);

        Ok(())
    }

    /// Outer-team width: `max_threads / thread_divisor /
    /// num_block_threads`, floored at one. `hw_threads` substitutes for
    /// `max_threads == 0`.
    pub fn num_region_threads(&self, hw_threads: usize) -> usize {
        let mt = if self.max_threads > 0 {
            self.max_threads
        } else {
            hw_threads.max(1)
        };
        (mt / self.thread_divisor.max(1) / self.num_block_threads.max(1)).max(1)
    }

    // ── Command-line option handling ─────────────────────────────────

    /// Apply recognized options from an embedded argument string and
    /// return the unused tokens, joined by single spaces, in their
    /// original order.
    pub fn apply_command_line_options(&mut self, arg_string: &str) -> StencilResult<String> {
        let args = tokenize_args(arg_string);
        let mut leftover: Vec<String> = Vec::new();
        let mut i = 0;
        while i < args.len() {
            if !self.match_option(&args, &mut i)? {
                leftover.push(args[i].clone());
                i += 1;
            }
        }
        Ok(leftover.join(" "))
    }

    /// Try to consume the option at `args[*i]`. Advances `*i` past the
    /// option and its value on a match.
    fn match_option(&mut self, args: &[String], i: &mut usize) -> StencilResult<bool> {
        let tok = &args[*i];
        let Some(name) = tok.strip_prefix('-') else {
            return Ok(false);
        };

        // Booleans use the [no-] prefix convention.
        let (bool_name, bool_val) = match name.strip_prefix("no-") {
            Some(rest) => (rest, false),
            None => (name, true),
        };
        match bool_name {
            "halo_exchange" => {
                self.enable_halo_exchange = bool_val;
                *i += 1;
                return Ok(true);
            }
            "vec_exchange" => {
                self.allow_vec_exchange = bool_val;
                *i += 1;
                return Ok(true);
            }
            "auto_tune" => {
                self.tuner.enabled = bool_val;
                *i += 1;
                return Ok(true);
            }
            _ => {}
        }

        // Per-domain-dim size options, with optional _<dim> suffix.
        for opt in SIZE_OPTIONS {
            if name == opt.name {
                let val = int_value(args, i)?;
                let target = self.size_tuple_mut(opt.field);
                for k in 0..target.len() {
                    target.set_at(k, val);
                }
                return Ok(true);
            }
            if let Some(dim) = name
                .strip_prefix(opt.name)
                .and_then(|rest| rest.strip_prefix('_'))
            {
                if self.dims.is_domain_dim(dim) {
                    let dim = dim.to_string();
                    let val = int_value(args, i)?;
                    self.size_tuple_mut(opt.field).set(&dim, val);
                    return Ok(true);
                }
            }
        }

        // Scalar options.
        match name {
            "max_threads" => {
                self.max_threads = int_value(args, i)? as usize;
                Ok(true)
            }
            "thread_divisor" => {
                self.thread_divisor = int_value(args, i)? as usize;
                Ok(true)
            }
            "block_threads" => {
                self.num_block_threads = int_value(args, i)? as usize;
                Ok(true)
            }
            "wf_depth" => {
                self.wf_depth = int_value(args, i)?.max(1) as usize;
                Ok(true)
            }
            "numa_pref" => {
                self.numa_pref = NumaPref::from(int_value(args, i)?);
                Ok(true)
            }
            "at_warmup_steps" => {
                self.tuner.warmup_steps = int_value(args, i)?;
                Ok(true)
            }
            "at_warmup_secs" => {
                self.tuner.warmup_secs = float_value(args, i)?;
                Ok(true)
            }
            "at_min_steps" => {
                self.tuner.min_steps = int_value(args, i)?;
                Ok(true)
            }
            "at_min_secs" => {
                self.tuner.min_secs = float_value(args, i)?;
                Ok(true)
            }
            "at_min_step" => {
                self.tuner.min_step = int_value(args, i)?;
                Ok(true)
            }
            "at_max_radius" => {
                self.tuner.max_radius = int_value(args, i)?;
                Ok(true)
            }
            "at_min_pts" => {
                self.tuner.min_pts = int_value(args, i)?;
                Ok(true)
            }
            "at_min_blks" => {
                self.tuner.min_blks = int_value(args, i)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn size_tuple_mut(&mut self, field: SizeField) -> &mut IdxTuple {
        match field {
            SizeField::RankDomain => &mut self.rank_domain_size,
            SizeField::MinPad => &mut self.min_pad_size,
            SizeField::Region => &mut self.region_size,
            SizeField::Block => &mut self.block_size,
            SizeField::SubBlock => &mut self.sub_block_size,
            SizeField::NumRanks => &mut self.num_ranks,
        }
    }

    /// Render the recognized-option reference with current values.
    pub fn help_text(&self) -> String {
        let mut out = String::new();
        for opt in SIZE_OPTIONS {
            let cur = self.clone_size(opt.field);
            let _ = writeln!(out, "  -{} <integer>", opt.name);
            let _ = writeln!(out, "      {} Current: {}.", opt.help, cur);
            let _ = writeln!(out, "  -{}_<dim> <integer>", opt.name);
            let _ = writeln!(out, "      Same, for one domain dim only.");
        }
        for (name, help) in SCALAR_OPTION_HELP {
            let _ = writeln!(out, "  -{name} <value>");
            let _ = writeln!(out, "      {help}");
        }
        for (name, help) in BOOL_OPTION_HELP {
            let _ = writeln!(out, "  -[no-]{name}");
            let _ = writeln!(out, "      {help}");
        }
        out
    }

    fn clone_size(&self, field: SizeField) -> IdxTuple {
        match field {
            SizeField::RankDomain => self.rank_domain_size.clone(),
            SizeField::MinPad => self.min_pad_size.clone(),
            SizeField::Region => self.region_size.clone(),
            SizeField::Block => self.block_size.clone(),
            SizeField::SubBlock => self.sub_block_size.clone(),
            SizeField::NumRanks => self.num_ranks.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SizeField {
    RankDomain,
    MinPad,
    Region,
    Block,
    SubBlock,
    NumRanks,
}

struct SizeOption {
    name: &'static str,
    field: SizeField,
    help: &'static str,
}

const SIZE_OPTIONS: &[SizeOption] = &[
    SizeOption {
        name: "rank_domain_size",
        field: SizeField::RankDomain,
        help: "Points in this rank's domain per domain dim.",
    },
    SizeOption {
        name: "min_pad_size",
        field: SizeField::MinPad,
        help: "Minimum extra padding outside the halo per domain dim.",
    },
    SizeOption {
        name: "region_size",
        field: SizeField::Region,
        help: "Region (outer tile) size per domain dim.",
    },
    SizeOption {
        name: "block_size",
        field: SizeField::Block,
        help: "Block (middle tile) size per domain dim.",
    },
    SizeOption {
        name: "sub_block_size",
        field: SizeField::SubBlock,
        help: "Sub-block (inner tile) size per domain dim.",
    },
    SizeOption {
        name: "num_ranks",
        field: SizeField::NumRanks,
        help: "Number of ranks per domain dim.",
    },
];

const SCALAR_OPTION_HELP: &[(&str, &str)] = &[
    ("max_threads", "Max worker threads; 0 uses the hardware count."),
    ("thread_divisor", "Divisor applied to max_threads."),
    ("block_threads", "Nested threads per block."),
    ("wf_depth", "Wave-front (temporal blocking) depth; 1 disables."),
    ("numa_pref", "NUMA node id, -1 local, -2 interleave, -9 none."),
    ("at_warmup_steps", "Auto-tuner warmup steps."),
    ("at_warmup_secs", "Auto-tuner warmup seconds."),
    ("at_min_steps", "Auto-tuner min steps per evaluation."),
    ("at_min_secs", "Auto-tuner min seconds per evaluation."),
    ("at_min_step", "Auto-tuner radius lower bound."),
    ("at_max_radius", "Auto-tuner initial search radius."),
    ("at_min_pts", "Auto-tuner min points per block."),
    ("at_min_blks", "Auto-tuner min blocks per region."),
];

const BOOL_OPTION_HELP: &[(&str, &str)] = &[
    ("halo_exchange", "Exchange halos with neighbor ranks."),
    ("vec_exchange", "Allow vectorized halo pack/unpack."),
    ("auto_tune", "Tune block sizes during run_solution()."),
];

/// Split an argument string on whitespace, honoring double quotes.
pub fn tokenize_args(arg_string: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut tmp = String::new();
    let mut in_quotes = false;
    for c in arg_string.chars() {
        if c.is_whitespace() && !in_quotes {
            if !tmp.is_empty() {
                args.push(std::mem::take(&mut tmp));
            }
        } else if c == '"' {
            if in_quotes {
                if !tmp.is_empty() {
                    args.push(std::mem::take(&mut tmp));
                }
                in_quotes = false;
            } else {
                in_quotes = true;
            }
        } else {
            tmp.push(c);
        }
    }
    if !tmp.is_empty() {
        args.push(tmp);
    }
    args
}

/// Consume the value following the option at `args[*i]` as an integer.
fn int_value(args: &[String], i: &mut usize) -> StencilResult<i64> {
    let opt = &args[*i];
    let Some(val) = args.get(*i + 1) else {
        return Err(StencilError::ConfigInvalid(format!(
            "no argument for option '{opt}'"
        )));
    };
    let parsed = val.parse::<i64>().map_err(|_| {
        StencilError::ConfigInvalid(format!("argument for option '{opt}' is not an integer"))
    })?;
    *i += 2;
    Ok(parsed)
}

/// Consume the value following the option at `args[*i]` as a float.
fn float_value(args: &[String], i: &mut usize) -> StencilResult<f64> {
    let opt = &args[*i];
    let Some(val) = args.get(*i + 1) else {
        return Err(StencilError::ConfigInvalid(format!(
            "no argument for option '{opt}'"
        )));
    };
    let parsed = val.parse::<f64>().map_err(|_| {
        StencilError::ConfigInvalid(format!("argument for option '{opt}' is not a number"))
    })?;
    *i += 2;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims3() -> Dims {
        Dims::new("t", ["x", "y", "z"], [])
    }

    #[test]
    fn test_block_size_option_sets_all_dims() {
        let mut s = KernelSettings::new(dims3());
        let rest = s
            .apply_command_line_options("-block_size 32 -foo bar")
            .expect("parse");
        assert_eq!(rest, "-foo bar");
        assert_eq!(s.block_size.vals(), &[32, 32, 32]);
    }

    #[test]
    fn test_per_dim_suffix_option() {
        let mut s = KernelSettings::new(dims3());
        let rest = s
            .apply_command_line_options("-block_size 16 -block_size_y 48")
            .expect("parse");
        assert_eq!(rest, "");
        assert_eq!(s.block_size.vals(), &[16, 48, 16]);
    }

    #[test]
    fn test_bool_options_with_no_prefix() {
        let mut s = KernelSettings::new(dims3());
        s.apply_command_line_options("-no-halo_exchange -auto_tune")
            .expect("parse");
        assert!(!s.enable_halo_exchange);
        assert!(s.tuner.enabled);
        s.apply_command_line_options("-halo_exchange").expect("parse");
        assert!(s.enable_halo_exchange);
    }

    #[test]
    fn test_quoted_tokens_and_passthrough_order() {
        let mut s = KernelSettings::new(dims3());
        let rest = s
            .apply_command_line_options("-alpha \"two words\" -wf_depth 4 -omega")
            .expect("parse");
        assert_eq!(rest, "-alpha two words -omega");
        assert_eq!(s.wf_depth, 4);
    }

    #[test]
    fn test_missing_and_bad_values_fail() {
        let mut s = KernelSettings::new(dims3());
        let err = s.apply_command_line_options("-block_size").unwrap_err();
        assert!(matches!(err, StencilError::ConfigInvalid(_)));
        let err = s.apply_command_line_options("-block_size eight").unwrap_err();
        assert!(matches!(err, StencilError::ConfigInvalid(_)));
    }

    #[test]
    fn test_adjust_rounds_levels() {
        let mut s = KernelSettings::new(dims3());
        s.rank_domain_size = IdxTuple::filled(&s.dims.domain_dims.clone(), 60);
        s.apply_command_line_options("-block_size 20").expect("parse");
        s.adjust().expect("adjust");
        // Inner dim rounds block 20 up to the cluster multiple 24.
        assert_eq!(s.block_size.get("z"), Some(24));
        assert_eq!(s.block_size.get("x"), Some(20));
        // Sub-block defaults to one cluster inner, whole block outer.
        assert_eq!(s.sub_block_size.get("z"), Some(VLEN as i64));
        assert_eq!(s.sub_block_size.get("x"), Some(20));
        // Region defaults to the rank domain, rounded to block multiples.
        assert_eq!(s.region_size.get("x"), Some(60));
        assert_eq!(s.region_size.get("z"), Some(72));
    }

    #[test]
    fn test_adjust_rejects_bad_sizes() {
        let mut s = KernelSettings::new(dims3());
        s.rank_domain_size.set("y", 0);
        let err = s.adjust().unwrap_err();
        assert!(matches!(err, StencilError::ConfigInvalid(_)));
    }

    #[test]
    fn test_region_thread_budget() {
        let mut s = KernelSettings::new(dims3());
        s.max_threads = 16;
        s.thread_divisor = 2;
        s.num_block_threads = 4;
        assert_eq!(s.num_region_threads(64), 2);
        s.num_block_threads = 64;
        assert_eq!(s.num_region_threads(64), 1, "budget floors at one");
        s.max_threads = 0;
        s.thread_divisor = 1;
        s.num_block_threads = 1;
        assert_eq!(s.num_region_threads(12), 12);
    }

    #[test]
    fn test_settings_serde_roundtrip() {
        let mut s = KernelSettings::new(dims3());
        s.wf_depth = 4;
        s.numa_pref = NumaPref::Interleave;
        let json = serde_json::to_string(&s).expect("serialize");
        let s2: KernelSettings = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(s, s2);
    }
}
