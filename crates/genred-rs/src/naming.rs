//! Kernel identities: what gets compiled and under which name.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::dtype::DType;
use crate::hashing::FieldHasher;

pub const KERNEL_NAME_PREFIX: &str = "libgenred";
pub const CHUNKED_TILES_FLAG: &str = "-DENABLECHUNK=1";

/// Minimum variable dimension above which squared/absolute distance sums are
/// compiled with chunked tiles.
const CHUNKED_TILES_MIN_DIM: usize = 100;

/// One distinct kernel configuration. Two specs with equal fields map to the
/// same kernel name in every process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelSpec {
    pub formula: String,
    pub aliases: Vec<String>,
    pub dtype: DType,
    pub lang: BackendKind,
    pub flags: Vec<String>,
}

impl KernelSpec {
    pub fn new<I, S>(formula: impl Into<String>, aliases: I, dtype: DType, lang: BackendKind) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let formula = formula.into();
        let mut flags = Vec::new();
        if uses_chunked_tiles(&formula) {
            flags.push(CHUNKED_TILES_FLAG.to_string());
        }
        Self {
            formula,
            aliases: aliases.into_iter().map(Into::into).collect(),
            dtype,
            lang,
            flags,
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        let flag = flag.into();
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    pub fn kernel_name(&self) -> String {
        let mut hasher = FieldHasher::new();
        hasher.field(&self.formula);
        for alias in &self.aliases {
            hasher.field(alias);
        }
        hasher
            .field(self.dtype.as_str())
            .field(self.lang.as_str());
        for flag in &self.flags {
            hasher.field(flag);
        }
        format!(
            "{KERNEL_NAME_PREFIX}_{}_{:016x}",
            self.lang.as_str(),
            hasher.finish()
        )
    }
}

fn chunked_reduction_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Reduction\(Sum\((Square|Abs)\(\(Var\(.*?\) . Var\(.*?\)\)\)\).*?\)")
            .expect("chunked reduction pattern is valid")
    })
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Var\(\s*\d+\s*,\s*(\d+)\s*,\s*([01])\s*\)")
            .expect("variable pattern is valid")
    })
}

/// Detects `Sum(Square(Var(..) - Var(..)))` style reductions between an `i`
/// and a `j` variable of the same, large dimension.
pub fn uses_chunked_tiles(formula: &str) -> bool {
    if !chunked_reduction_pattern().is_match(formula) {
        return false;
    }
    let mut dims = [None::<usize>; 2];
    for caps in variable_pattern().captures_iter(formula) {
        let cat: usize = match caps[2].parse() {
            Ok(cat) => cat,
            Err(_) => continue,
        };
        if dims[cat].is_none() {
            dims[cat] = caps[1].parse().ok();
        }
    }
    match dims {
        [Some(i_dim), Some(j_dim)] => i_dim == j_dim && i_dim > CHUNKED_TILES_MIN_DIM,
        _ => false,
    }
}
