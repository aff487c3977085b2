fn main() {
    // Forward the ESP-IDF build environment to dependents only when building
    // for the target; host builds (tests) have no ESP-IDF toolchain.
    if std::env::var("CARGO_FEATURE_ESPIDF").is_ok() {
        embuild::espidf::sysenv::output();
    }
}
