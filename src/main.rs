#[cfg(not(target_os = "android"))]
fn main() -> anyhow::Result<()> {
    env_logger::init();
    barcode_scanner::app::run()
}

// On Android the entry point is `android_main` in the cdylib.
#[cfg(target_os = "android")]
fn main() {}
