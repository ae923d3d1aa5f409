mod common;
mod dataset_flow_tests;
mod resume_tests;
