//! Camera permission gate.
//!
//! The gate resolves once per screen entry: either the permission is already
//! granted, or a single platform prompt is issued and the asynchronous
//! result decides between Granted and Denied. There is no re-prompt; the
//! user retries by leaving and re-entering the scan screen.

use anyhow::Result;

pub const CAMERA_PERMISSION: &str = "android.permission.CAMERA";
pub const CAMERA_PERMISSION_REQUEST_CODE: i32 = 1001;

/// Authorization of the camera capability at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionState {
    Unknown,
    Granted,
    Denied,
}

/// Platform permission capability.
pub trait PermissionGate {
    /// Synchronously queries the current authorization.
    fn check(&self) -> PermissionState;

    /// Issues the platform permission prompt. The result is observed on the
    /// UI thread by re-querying [`PermissionGate::check`].
    fn request(&self) -> Result<()>;
}

#[cfg(target_os = "android")]
pub use self::android::AndroidPermissionGate;

#[cfg(not(target_os = "android"))]
pub use self::host::HostPermissionGate;

#[cfg(target_os = "android")]
mod android {
    use anyhow::Result;
    use jni::{
        objects::{JObject, JValueGen},
        sys::{jint, JNIInvokeInterface_, _jobject},
        JavaVM,
    };
    use log::warn;

    use super::{PermissionGate, PermissionState, CAMERA_PERMISSION};

    /// Permission queries and prompts through the hosting activity.
    pub struct AndroidPermissionGate {
        app: slint::android::AndroidApp,
    }

    impl AndroidPermissionGate {
        pub fn new(app: slint::android::AndroidApp) -> Self {
            AndroidPermissionGate { app }
        }
    }

    impl PermissionGate for AndroidPermissionGate {
        fn check(&self) -> PermissionState {
            match check_self_permission(&self.app, CAMERA_PERMISSION) {
                Ok(true) => PermissionState::Granted,
                Ok(false) => PermissionState::Denied,
                Err(err) => {
                    warn!("permission query failed: {err:?}");
                    PermissionState::Denied
                }
            }
        }

        fn request(&self) -> Result<()> {
            // Runtime prompts only exist from API 23 on; older devices
            // grant at install time.
            if sdk_version(&self.app)? >= 23 {
                request_permissions(
                    &self.app,
                    &[CAMERA_PERMISSION],
                    super::CAMERA_PERMISSION_REQUEST_CODE,
                )?;
            }
            Ok(())
        }
    }

    fn check_self_permission(app: &slint::android::AndroidApp, permission: &str) -> Result<bool> {
        unsafe {
            let vm = JavaVM::from_raw(app.vm_as_ptr() as *mut *const JNIInvokeInterface_)?;
            let mut env = vm.attach_current_thread()?;
            let granted = env
                .get_static_field(
                    "android/content/pm/PackageManager",
                    "PERMISSION_GRANTED",
                    "I",
                )?
                .i()?;
            let permission_str = env.new_string(permission)?;
            let activity: JObject<'_> = JObject::from_raw(app.activity_as_ptr() as *mut _jobject);
            let result = env
                .call_method(
                    activity,
                    "checkSelfPermission",
                    "(Ljava/lang/String;)I",
                    &[JValueGen::Object(&JObject::from(permission_str))],
                )?
                .i()?;
            Ok(result == granted)
        }
    }

    fn request_permissions(
        app: &slint::android::AndroidApp,
        permissions: &[&str],
        request_code: i32,
    ) -> Result<()> {
        unsafe {
            let vm = JavaVM::from_raw(app.vm_as_ptr() as *mut *const JNIInvokeInterface_)?;
            let mut env = vm.attach_current_thread()?;
            let activity: JObject<'_> = JObject::from_raw(app.activity_as_ptr() as *mut _jobject);

            let array =
                env.new_object_array(permissions.len() as jint, "java/lang/String", JObject::null())?;
            for (index, permission) in permissions.iter().enumerate() {
                let permission_str = env.new_string(*permission)?;
                env.set_object_array_element(&array, index as jint, permission_str)?;
            }

            env.call_method(
                activity,
                "requestPermissions",
                "([Ljava/lang/String;I)V",
                &[
                    JValueGen::Object(&JObject::from(array)),
                    request_code.into(),
                ],
            )?;
        }
        Ok(())
    }

    fn sdk_version(app: &slint::android::AndroidApp) -> Result<i32> {
        unsafe {
            let vm = JavaVM::from_raw(app.vm_as_ptr() as *mut *const JNIInvokeInterface_)?;
            let mut env = vm.attach_current_thread()?;
            let sdk = env
                .get_static_field("android/os/Build$VERSION", "SDK_INT", "I")?
                .i()?;
            Ok(sdk)
        }
    }
}

#[cfg(not(target_os = "android"))]
mod host {
    use anyhow::Result;

    use super::{PermissionGate, PermissionState};

    /// Host platforms gate camera access at the OS level outside the
    /// process, so the in-app gate reports Granted.
    #[derive(Default)]
    pub struct HostPermissionGate;

    impl PermissionGate for HostPermissionGate {
        fn check(&self) -> PermissionState {
            PermissionState::Granted
        }

        fn request(&self) -> Result<()> {
            Ok(())
        }
    }
}
