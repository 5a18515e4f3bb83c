//! 医疗建议：记录、校验、回退解析链与报告

pub mod heuristic;
pub mod record;
pub mod report;
pub mod resolver;
pub mod validate;

pub use heuristic::extract_labeled_fields;
pub use record::{urgency_description, MedicalAdvice, OtcRecommendation};
pub use report::render_report;
pub use resolver::{
    BraceExtraction, DirectParse, LabelHeuristic, ResolveError, ResolveStage, ResponseResolver,
    StageAttempt, StageFailure,
};
pub use validate::{validate, CandidateAdvice, CandidateOtc, ValidationError};
