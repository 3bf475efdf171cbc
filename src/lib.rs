pub mod app;
pub mod camera;
pub mod detect;
pub mod error;
pub mod flow;
pub mod nav;
pub mod permission;
pub mod session;

#[cfg(target_os = "android")]
#[no_mangle]
fn android_main(android_app: slint::android::AndroidApp) {
    android_logger::init_once(
        android_logger::Config::default().with_max_level(log::LevelFilter::Info),
    );
    if let Err(err) = slint::android::init(android_app.clone()) {
        log::error!("failed to initialise the android backend: {err}");
        return;
    }
    if let Err(err) = app::run(android_app) {
        log::error!("scanner exited with error: {err:?}");
    }
}
