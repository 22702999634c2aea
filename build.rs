fn main() {
    // ESP-IDF link arguments are only needed for the on-device firmware build.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
