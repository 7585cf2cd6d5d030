use strum::{Display, EnumString};

/// Knobs threaded through the parser and the builder
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Accept ownership annotations on block arguments and treat the parsed
    /// functions as ownership qualified
    pub enable_ownership_ssa: bool,
    /// When set, ownership annotations are never parsed and every block
    /// argument gets `OwnershipKind::Any`
    pub assume_unqualified_ownership: bool,
    /// Dump interesting instructions (`begin_apply`) while parsing
    pub verbose: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            enable_ownership_ssa: false,
            assume_unqualified_ownership: true,
            verbose: false,
        }
    }
}

impl ParserOptions {
    pub fn parses_ownership(&self) -> bool {
        self.enable_ownership_ssa && !self.assume_unqualified_ownership
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OptimizationMode {
    /// -Onone. Debug uses keep values alive.
    #[default]
    None,
    Speed,
    Size,
}

/// What may be assumed about `@inout` arguments aliasing other memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum InoutAliasingAssumption {
    /// Inout arguments never alias anything the function can see
    #[default]
    NotAliasing,
    /// Inout arguments may alias anything
    Aliasing,
}

#[derive(Debug, Clone, Default)]
pub struct OptimizerOptions {
    pub optimization_mode: OptimizationMode,
    pub inout_aliasing: InoutAliasingAssumption,
}

impl OptimizerOptions {
}
