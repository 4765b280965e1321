mod batch_tests;
mod lifecycle_tests;
