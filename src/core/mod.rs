//! 核心编排层：会话错误、阶段、事件、请求状态机、会话监管、主控编排

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod session;
pub mod session_supervisor;
pub mod state;

pub use error::SessionError;
pub use events::{SessionEvent, SessionEventKind, SessionId};
pub use orchestrator::{
    create_consultation, spawn_command_loop, Command, Consultation, ConsultationRuntime,
};
pub use session::{RequestSession, SessionOutcome, Submission};
pub use session_supervisor::SessionSupervisor;
pub use state::SessionPhase;
