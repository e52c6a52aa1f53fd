#[cfg(test)]
mod thread_tests;
