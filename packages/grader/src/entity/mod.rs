pub mod correlation_record;
pub mod submission;
pub mod submission_result;
pub mod task;
pub mod test_result;
