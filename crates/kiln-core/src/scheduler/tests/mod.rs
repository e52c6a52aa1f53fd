// Scheduler test module
#[cfg(test)]
mod support;
