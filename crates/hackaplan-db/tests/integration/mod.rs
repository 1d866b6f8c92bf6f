mod common;
mod lookup_repository_tests;
mod rate_limit_tests;
mod scheduler_tests;
