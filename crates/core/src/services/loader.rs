use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::{self, StageError};
use crate::config::PluginSettings;
use crate::features::{FeatureName, FeatureRecord, FeatureSink, SinkError};
use crate::services::analyzer::{AnalyzerBackend, AnalyzerError, GoBinary};

/// Classification of the value an analyzer panicked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanicMessage {
    StringMessage(String),
    OpaqueMessage,
}

impl PanicMessage {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<String>() {
            Ok(text) => PanicMessage::StringMessage(*text),
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(text) => PanicMessage::StringMessage((*text).to_string()),
                Err(_) => PanicMessage::OpaqueMessage,
            },
        }
    }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanicMessage::StringMessage(text) => f.write_str(text),
            PanicMessage::OpaqueMessage => f.write_str("panic payload could not be recovered"),
        }
    }
}

/// Result of one protected open attempt.
pub enum OpenAttempt {
    Opened(Box<dyn GoBinary>),
    Failed(AnalyzerError),
    Panicked(PanicMessage),
}

/// Open `path` with `analyzer`, turning a panic inside the analyzer into a value.
pub fn open_protected(analyzer: &dyn AnalyzerBackend, path: &Path) -> OpenAttempt {
    match panic::catch_unwind(AssertUnwindSafe(|| analyzer.open(path))) {
        Ok(Ok(binary)) => OpenAttempt::Opened(binary),
        Ok(Err(err)) => OpenAttempt::Failed(err),
        Err(payload) => {
            let message = PanicMessage::from_payload(payload);
            warn!(analyzer = analyzer.name(), panic = %message, "analyzer panicked during open");
            OpenAttempt::Panicked(message)
        }
    }
}

/// Closes the wrapped binary when dropped, whichever way the invocation ends.
struct OpenedBinary {
    inner: Box<dyn GoBinary>,
}

impl OpenedBinary {
    fn get(&self) -> &dyn GoBinary {
        self.inner.as_ref()
    }
}

impl Drop for OpenedBinary {
    fn drop(&mut self) {
        self.inner.close();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Analysis failed.
    Exception,
    /// The feature sink refused a record.
    Output,
}

/// Fatal error payload.
#[derive(Debug)]
pub struct PluginError {
    pub kind: ErrorKind,
    pub title: String,
    pub message: String,
    pub cause: Option<AnalyzerError>,
}

impl PluginError {
    pub fn new(kind: ErrorKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind, title: title.into(), message: message.into(), cause: None }
    }

    pub fn with_cause(mut self, cause: AnalyzerError) -> Self {
        self.cause = Some(cause);
        self
    }

    fn from_sink(err: SinkError) -> Self {
        PluginError::new(ErrorKind::Output, "Failed to add feature", err.to_string())
    }

    fn from_stage(err: StageError, title: &str, message: &str) -> Self {
        match err {
            StageError::Analyzer(cause) => {
                PluginError::new(ErrorKind::Exception, title, message).with_cause(cause)
            }
            StageError::Sink(err) => PluginError::from_sink(err),
        }
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " ({cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for PluginError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// The single result of an invocation.
#[derive(Debug)]
pub enum AnalysisOutcome {
    Success,
    OptOut(String),
    /// A corrupted header; the record has already been delivered to the sink.
    MalformedFinding(FeatureRecord),
    FatalError(PluginError),
}

impl AnalysisOutcome {
    /// Status as reported to the host: `completed`, `opt-out`, or `error`.
    pub fn status(&self) -> &'static str {
        match self {
            AnalysisOutcome::Success | AnalysisOutcome::MalformedFinding(_) => "completed",
            AnalysisOutcome::OptOut(_) => "opt-out",
            AnalysisOutcome::FatalError(_) => "error",
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status() == "completed"
    }

    /// Human-readable message for non-success outcomes.
    pub fn message(&self) -> Option<String> {
        match self {
            AnalysisOutcome::Success | AnalysisOutcome::MalformedFinding(_) => None,
            AnalysisOutcome::OptOut(reason) => Some(reason.clone()),
            AnalysisOutcome::FatalError(err) => Some(err.to_string()),
        }
    }
}

/// Open-time failures that mean "this input is not for us".
fn is_unsupported(err_text: &str) -> bool {
    err_text.to_lowercase().contains("unsupported")
}

fn is_corrupted_header(err_text: &str) -> bool {
    err_text.to_lowercase().contains("fail to read string table length")
}

/// Drives one analyzer over one binary and classifies what happens.
///
/// Holds no per-invocation state; the same instance can run any number of
/// invocations.
pub struct GoInfoPlugin<'a> {
    pub settings: &'a PluginSettings,
    pub analyzer: &'a dyn AnalyzerBackend,
}

impl<'a> GoInfoPlugin<'a> {
    pub fn new(settings: &'a PluginSettings, analyzer: &'a dyn AnalyzerBackend) -> Self {
        Self { settings, analyzer }
    }

    /// Analyze the binary at `path`, delivering features to `sink`.
    pub fn execute(&self, path: &Path, sink: &mut dyn FeatureSink) -> AnalysisOutcome {
        info!(
            plugin = %self.settings.name,
            analyzer = self.analyzer.name(),
            path = %path.display(),
            "analyzing binary"
        );

        let binary = match open_protected(self.analyzer, path) {
            OpenAttempt::Opened(inner) => OpenedBinary { inner },
            OpenAttempt::Failed(err) => return self.classify_open_error(err, sink),
            OpenAttempt::Panicked(message) => return classify_open_panic(message),
        };

        match self.extract(binary.get(), sink) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "analysis aborted");
                AnalysisOutcome::FatalError(err)
            }
        }
    }

    fn classify_open_error(
        &self,
        err: AnalyzerError,
        sink: &mut dyn FeatureSink,
    ) -> AnalysisOutcome {
        let text = err.to_string();
        if is_unsupported(&text) {
            debug!(error = %text, "opting out of unsupported file");
            return AnalysisOutcome::OptOut(format!(
                "File could not be opened by pygore with message {text}"
            ));
        }
        if is_corrupted_header(&text) {
            debug!(error = %text, "reporting corrupted header");
            let record = FeatureRecord::new(
                FeatureName::Malformed,
                format!("PE file was corrupted and it's header couldn't be read with error {text}"),
            );
            return match sink.add_feature(record.clone()) {
                Ok(()) => AnalysisOutcome::MalformedFinding(record),
                Err(err) => AnalysisOutcome::FatalError(PluginError::from_sink(err)),
            };
        }
        AnalysisOutcome::FatalError(
            PluginError::new(
                ErrorKind::Exception,
                "Could not be opened",
                "Pygore could not open the file",
            )
            .with_cause(err),
        )
    }

    fn extract(
        &self,
        binary: &dyn GoBinary,
        sink: &mut dyn FeatureSink,
    ) -> Result<AnalysisOutcome, PluginError> {
        match binary.compiler_version() {
            Ok(Some(version)) => debug!(%version, "found go version"),
            Ok(None) => return Ok(not_a_go_binary()),
            // A failed query leaves the version absent, whatever the wording.
            Err(err) => {
                debug!(error = %err, "go version query failed");
                return Ok(not_a_go_binary());
            }
        }

        analysis::extract_compiler_metadata(binary, sink).map_err(PluginError::from_sink)?;

        let user_packages = analysis::extract_packages(binary, sink).map_err(|e| {
            PluginError::from_stage(
                e,
                "Failed to get packages",
                "Failed to get the packages for the go binary.",
            )
        })?;

        analysis::extract_vendor_packages(binary, sink).map_err(|e| {
            PluginError::from_stage(
                e,
                "Failed to get vendor packages",
                "Failed to get the vendor packages for the go binary.",
            )
        })?;

        analysis::extract_types(binary, &user_packages, sink).map_err(|e| {
            PluginError::from_stage(
                e,
                "Failed to get GoTypes",
                "Failed to get the GoTypes for the go binary.",
            )
        })?;

        Ok(AnalysisOutcome::Success)
    }
}

fn not_a_go_binary() -> AnalysisOutcome {
    debug!("no go version marker, opting out");
    AnalysisOutcome::OptOut("Not a go binary, no go version found.".to_string())
}

fn classify_open_panic(message: PanicMessage) -> AnalysisOutcome {
    if message == PanicMessage::StringMessage("Unsupported architecture".to_string()) {
        return AnalysisOutcome::OptOut(format!(
            "Gore paniced while trying to open the file with the panic message: '{message}'"
        ));
    }
    AnalysisOutcome::FatalError(PluginError::new(
        ErrorKind::Exception,
        "Pygore Panic",
        format!("Pygore paniced with a panic message: '{message}'"),
    ))
}
