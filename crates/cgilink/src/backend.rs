//! Porting-assistant backend wiring.
//!
//! Every request type the desktop UI sends is bound to a service trait. The
//! services do the real work (solution analysis, project file rewrites, IDE
//! discovery, downloads, feedback upload) and are handed in by the host; this
//! module only translates between them and a [`Connection`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cgilink_connection::{Connection, ConnectionError, HandlerError, Notifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

pub const ANALYZE_SOLUTION: &str = "analyzeSolution";
pub const APPLY_PORTING_PROJECT_FILE_CHANGES: &str = "applyPortingProjectFileChanges";
pub const OPEN_SOLUTION_IN_IDE: &str = "openSolutionInIDE";
pub const CHECK_INTERNET_ACCESS: &str = "checkInternetAccess";
pub const SEND_CUSTOMER_FEEDBACK: &str = "sendCustomerFeedback";

pub const ON_DATA_UPDATE: &str = "onDataUpdate";
pub const ON_API_ANALYSIS_UPDATE: &str = "onApiAnalysisUpdate";
pub const ON_NUGET_PACKAGE_UPDATE: &str = "onNugetPackageUpdate";

/// Objects fetched by `checkInternetAccess`. One successful download is enough.
pub const CONNECTIVITY_PROBE_OBJECTS: [&str; 3] = [
    "newtonsoft.json.json.gz",
    "52projects.json.gz",
    "2a486f72.mega.json.gz",
];

/// Executable searched for below the IDE installation directory.
pub const IDE_EXECUTABLE: &str = "devenv.exe";

/// `errorValue` of an `openSolutionInIDE` reply when no IDE is installed.
pub const IDE_NOT_FOUND: &str = "A valid installation of Visual Studio was not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStatus {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result shape the UI expects from service-backed handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse<T, E> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_value: Option<E>,
}

impl<T, E> ServiceResponse<T, E> {
    pub fn success(value: T) -> Self {
        Self {
            value: Some(value),
            status: ResponseStatus {
                status: Status::Success,
                error: None,
            },
            error_value: None,
        }
    }

    pub fn failed(error: impl Into<String>, error_value: Option<E>) -> Self {
        Self {
            value: None,
            status: ResponseStatus {
                status: Status::Failed,
                error: Some(error.into()),
            },
            error_value,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.status == Status::Success
    }
}

/// Feedback form submitted from the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerFeedbackRequest {
    pub feedback: String,
    pub category: String,
    pub date: String,
    pub email: String,
    pub timestamp: String,
}

/// Document stored for one feedback submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackContent {
    pub feedback: String,
    pub category: String,
    pub date: String,
    pub email: String,
    #[serde(rename = "machineID")]
    pub machine_id: String,
}

/// Storage key for a feedback submission.
pub fn feedback_key(machine_id: &str, timestamp: &str) -> String {
    format!("{machine_id}/{timestamp}/metadata")
}

/// Runs solution assessments.
pub trait AssessmentService: Send + Sync + 'static {
    /// Analyze a solution. Per-project API and package results may be pushed
    /// through `progress` before the final result is returned.
    fn analyze_solution(
        &self,
        request: Value,
        progress: &ProgressReporter,
    ) -> Result<Value, HandlerError>;
}

/// Applies porting changes to project files.
pub trait PortingService: Send + Sync + 'static {
    fn apply_porting_changes(&self, request: Value) -> Result<Value, HandlerError>;
}

/// Finds and starts the IDE.
pub trait IdeLocator: Send + Sync + 'static {
    /// Installation directory of the newest IDE, if one is installed.
    fn install_path(&self) -> Option<PathBuf>;

    /// The IDE executable below [`install_path`](Self::install_path).
    fn find_executable(&self) -> Option<PathBuf> {
        self.install_path()
            .and_then(|root| find_file(&root, IDE_EXECUTABLE))
    }

    /// Start the IDE on a solution without waiting for it to exit.
    fn launch(&self, executable: &Path, solution_path: &str) -> std::io::Result<()> {
        std::process::Command::new(executable)
            .arg(solution_path)
            .spawn()
            .map(|_child| ())
    }
}

/// Downloads objects from the assessment data store.
pub trait ConnectivityProbe: Send + Sync + 'static {
    fn download(&self, object_key: &str) -> std::io::Result<Vec<u8>>;
}

/// Uploads customer feedback.
pub trait FeedbackUploader: Send + Sync + 'static {
    /// Stable anonymous identifier of this machine.
    fn machine_id(&self) -> String;

    /// Store `content` under `key`. `Ok(false)` when the endpoint refused it.
    fn put(&self, key: &str, content: &FeedbackContent) -> Result<bool, HandlerError>;
}

/// Pushes progress notifications to the UI from synchronous service code.
///
/// A notification that cannot be sent (connection closed) is dropped.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    notifier: Notifier,
}

impl ProgressReporter {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }

    pub fn data_update<T: Serialize + ?Sized>(&self, payload: &T) {
        self.emit(ON_DATA_UPDATE, payload);
    }

    pub fn api_analysis_update<T: Serialize + ?Sized>(&self, payload: &T) {
        self.emit(ON_API_ANALYSIS_UPDATE, payload);
    }

    pub fn nuget_package_update<T: Serialize + ?Sized>(&self, payload: &T) {
        self.emit(ON_NUGET_PACKAGE_UPDATE, payload);
    }

    fn emit<T: Serialize + ?Sized>(&self, msg_type: &str, payload: &T) {
        if let Err(err) = self.notifier.blocking_notify(msg_type, payload) {
            debug!(msg_type, error = %err, "progress notification dropped");
        }
    }
}

/// The services behind the backend's request handlers.
#[derive(Clone)]
pub struct Backend {
    assessment: Arc<dyn AssessmentService>,
    porting: Arc<dyn PortingService>,
    ide: Arc<dyn IdeLocator>,
    probe: Arc<dyn ConnectivityProbe>,
    feedback: Arc<dyn FeedbackUploader>,
}

impl Backend {
    pub fn new(
        assessment: Arc<dyn AssessmentService>,
        porting: Arc<dyn PortingService>,
        ide: Arc<dyn IdeLocator>,
        probe: Arc<dyn ConnectivityProbe>,
        feedback: Arc<dyn FeedbackUploader>,
    ) -> Self {
        Self {
            assessment,
            porting,
            ide,
            probe,
            feedback,
        }
    }

    /// Register every backend handler on `connection`.
    ///
    /// The returned reporter sends `onDataUpdate` and friends; hand it to
    /// whatever produces progress outside a request (log sinks, watchers).
    pub fn register(&self, connection: &Connection) -> Result<ProgressReporter, ConnectionError> {
        let reporter = ProgressReporter::new(connection.notifier());

        let assessment = Arc::clone(&self.assessment);
        let progress = reporter.clone();
        connection.on_blocking(ANALYZE_SOLUTION, move |request: Value| {
            assessment.analyze_solution(request, &progress)
        })?;

        let porting = Arc::clone(&self.porting);
        connection.on_blocking(APPLY_PORTING_PROJECT_FILE_CHANGES, move |request: Value| {
            porting.apply_porting_changes(request)
        })?;

        let ide = Arc::clone(&self.ide);
        connection.on_blocking(OPEN_SOLUTION_IN_IDE, move |solution_path: String| {
            Ok(open_solution_in_ide(ide.as_ref(), &solution_path))
        })?;

        let probe = Arc::clone(&self.probe);
        connection.on_blocking(CHECK_INTERNET_ACCESS, move |_: Value| {
            Ok(check_internet_access(probe.as_ref()))
        })?;

        let feedback = Arc::clone(&self.feedback);
        connection.on_blocking(
            SEND_CUSTOMER_FEEDBACK,
            move |request: CustomerFeedbackRequest| {
                send_customer_feedback(feedback.as_ref(), request)
            },
        )?;

        info!("backend handlers registered");
        Ok(reporter)
    }
}

/// Open `solution_path` in the installed IDE.
pub fn open_solution_in_ide(ide: &dyn IdeLocator, solution_path: &str) -> ServiceResponse<bool, String> {
    let Some(executable) = ide.find_executable() else {
        return ServiceResponse::failed("No Visual Studio", Some(IDE_NOT_FOUND.to_string()));
    };
    match ide.launch(&executable, solution_path) {
        Ok(()) => {
            info!(executable = %executable.display(), "IDE launched");
            ServiceResponse::success(true)
        }
        Err(err) => ServiceResponse::failed(err.to_string(), Some(err.to_string())),
    }
}

/// True when at least one probe object can be downloaded.
pub fn check_internet_access(probe: &dyn ConnectivityProbe) -> bool {
    CONNECTIVITY_PROBE_OBJECTS.iter().any(|key| match probe.download(key) {
        Ok(_) => true,
        Err(err) => {
            debug!(object = key, error = %err, "probe download failed");
            false
        }
    })
}

/// Store one feedback submission under `<machineId>/<timestamp>/metadata`.
pub fn send_customer_feedback(
    uploader: &dyn FeedbackUploader,
    request: CustomerFeedbackRequest,
) -> Result<bool, HandlerError> {
    let machine_id = uploader.machine_id();
    let key = feedback_key(&machine_id, &request.timestamp);
    let content = FeedbackContent {
        feedback: request.feedback,
        category: request.category,
        date: request.date,
        email: request.email,
        machine_id,
    };
    uploader.put(&key, &content)
}

/// First file named `name` below `root`. Unreadable directories are skipped.
pub fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
        .map(DirEntry::into_path)
}
