// Resource pool test module
#[cfg(test)]
mod support;

#[cfg(test)]
mod pool_tests;
