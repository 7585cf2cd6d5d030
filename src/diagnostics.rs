use colored::Colorize;
use strum::{Display, IntoStaticStr};

use crate::source::{SourceFile, Span};

/// Expands to the name of the enclosing function
macro_rules! function {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        type_name_of(f)
            .rsplit("::")
            .find(|&part| part != "f" && part != "{{closure}}")
            .unwrap_or("<unknown>")
    }};
}

pub(crate) use function;

/// Records a diagnostic through `$self.diagnose(..)`. With the
/// `error-backtrace` feature the diagnostic also remembers which function
/// raised it.
macro_rules! report {
    ($self:expr, $span:expr, $kind:ident, $($message:tt)+) => {{
        #[allow(unused_mut)]
        let mut diagnostic = $crate::diagnostics::Diagnostic::error(
            $span,
            $crate::diagnostics::DiagnosticKind::$kind,
            format!($($message)+),
        );

        #[cfg(feature = "error-backtrace")]
        {
            diagnostic.raised_at = Some(format!(
                "{}::{} (at {}:{}:{})",
                module_path!(),
                $crate::diagnostics::function!(),
                file!(),
                line!(),
                column!()
            ));
        }

        $self.diagnose(diagnostic)
    }};
}

pub(crate) use report;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
}

/// Every distinguishable problem the parser reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum DiagnosticKind {
    /* Grammar */
    ExpectedToken,
    InvalidToken,
    InvalidLiteral,
    UnknownOpcode,
    UnknownAttribute,
    UnknownLinkage,
    UnknownStage,
    MultipleStageDeclarations,

    /* Names */
    RedefinedValue,
    UndefinedValue,
    RedefinedBlock,
    UndefinedBlock,
    RedefinedFunction,
    UndefinedFunction,
    UndefinedGlobal,
    RedefinedGlobal,
    PriorReference,
    UnknownType,
    UnknownDecl,
    UnknownField,
    UnknownEnumCase,
    UnknownProtocol,

    /* Types */
    ValueTypeMismatch,
    DefinitionTypeMismatch,
    FunctionTypeMismatch,
    GlobalTypeMismatch,
    InvalidOperandType,
    NotAnAddress,
    NotAFunction,
    InvalidCoroutineKind,
    FieldIndexOutOfRange,
    TupleElementCountMismatch,

    /* Structure */
    WrongResultCount,
    WrongArgumentCount,
    MissingSubstitutions,
    TooManySubstitutions,
    SubstitutionMismatch,
    SubstitutionsOnNonGenericType,
    MissingAccessAttribute,
    ObjcWithTailElements,
    MissingDefaultCase,
    UnknownDebugVarAttribute,
    UnsupportedOwnershipKind,

    /* Declarations */
    UndeclaredScope,
    RedefinedScope,
    UnknownVtableClass,
    UnknownConformance,
    UnknownWitnessEntry,
    CoverageMapFunctionNotFound,
    InvalidCounterExpression,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub span: Span,
    pub message: String,
    /// Rust location that raised the diagnostic
    pub raised_at: Option<String>,
}

impl Diagnostic {
    pub fn error(span: Span, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            span,
            message: message.into(),
            raised_at: None,
        }
    }

    pub fn note(span: Span, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Note,
            ..Self::error(span, kind, message)
        }
    }

    pub fn warning(span: Span, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(span, kind, message)
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Colored rendering with the offending line highlighted
    pub fn render(&self, source: &SourceFile) -> String {
        let severity = match self.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
            Severity::Note => "note".cyan().bold(),
        };

        let mut rendered = String::new();

        if let Some(raised_at) = &self.raised_at {
            rendered.push_str(&format!("{}: {}\n", "backtrace".blue(), raised_at.white()));
        }

        rendered.push_str(&format!(
            "{severity}[{}]: {} ({}:{}:{})\n{}",
            <&'static str>::from(self.kind),
            self.message,
            source.origin,
            source.row_for_position(self.span.start),
            source.column_for_position(self.span.start),
            source.highlight_span(self.span)
        ));

        rendered
    }
}

/// Receiver for everything the parser reports. Diagnostics are delivered
/// synchronously, in the order they are found.
pub trait DiagnosticSink {
    fn diagnose(&mut self, diagnostic: Diagnostic);

    fn has_errors(&self) -> bool;
}

/// Sink which keeps every diagnostic for later rendering or inspection
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn count_of(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.iter().filter(|d| d.kind == kind).count()
    }

    pub fn kinds(&self) -> Vec<DiagnosticKind> {
        self.diagnostics.iter().map(|d| d.kind).collect()
    }

    pub fn render_all(&self, source: &SourceFile) -> String {
        self.diagnostics
            .iter()
            .map(|d| d.render(source))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DiagnosticSink for DiagnosticCollector {
    fn diagnose(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}
