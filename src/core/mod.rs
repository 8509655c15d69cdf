//! 核心编排层：错误、时钟、执行驱动、结果历史、编排器与优雅关闭

pub mod builder;
pub mod clock;
pub(crate) mod driver;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod shutdown;

pub use builder::{Collaborators, OrchestratorBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{CAUSE_CANCELLED, CAUSE_TIMEOUT};
pub use error::{CollaboratorError, ErrorKind, HiveError};
pub use history::{HistoryPersistence, OutcomeHistory};
pub use orchestrator::{Connectivity, ExecutionTicket, HealthSnapshot, Orchestrator};
pub use shutdown::{ShutdownManager, ShutdownReason};
