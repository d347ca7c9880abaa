fn main() {
    println!("cargo:rerun-if-env-changed=WIFI_SSID");
    println!("cargo:rerun-if-env-changed=WIFI_PASSWORD");

    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
