pub mod config;
pub mod dispatch_token;
pub mod grading_request;
pub mod grading_result;
pub mod mq;
pub mod retry;
pub mod submission_status;

pub use dispatch_token::DispatchToken;
pub use grading_result::OutcomeCode;
pub use submission_status::SubmissionStatus;
