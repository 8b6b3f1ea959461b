mod common;
mod dispatch_tests;
mod postgres_tests;
