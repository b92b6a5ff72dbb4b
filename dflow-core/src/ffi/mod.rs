//! FFI contract for dynamically loaded component libraries.
//!
//! A library contributing component specs exports exactly one symbol,
//! [`REGISTRY_ACCESSOR_SYMBOL`], of type [`ComponentRegistryAccessor`].
//! It returns a pointer to a pointer to that library's own
//! lazily-initialized [`crate::registry::Registry`], so the host process
//! can reach into a plugin's local static without the plugin needing to
//! know anything about the host's registry instance.
//!
//! This relies on the plugin and host being built from the same
//! `dflow-core` (so `Registry`'s layout matches on both sides) — the
//! same constraint any same-toolchain dynamic-plugin contract carries.

use crate::registry::Registry;

/// Function signature every plugin library exports under
/// [`REGISTRY_ACCESSOR_SYMBOL`].
///
/// # Safety
/// The returned pointer must point to a valid, stable `*mut Registry`
/// slot for the lifetime of the library (typically a `OnceLock` behind a
/// `static`). A null inner pointer means the slot hasn't been
/// initialized yet — the host must treat that as "library exports no
/// components" rather than dereferencing it.
pub type ComponentRegistryAccessor = unsafe extern "C" fn() -> *mut *mut Registry;

/// Symbol name every plugin library must export, NUL-terminated for
/// `libloading::Library::get`.
pub const REGISTRY_ACCESSOR_SYMBOL: &[u8] = b"dflow_get_component_registry\0";

/// Declares a library-local component registry and exports the accessor
/// symbol the host looks up via [`REGISTRY_ACCESSOR_SYMBOL`].
///
/// ```ignore
/// dflow_core::register_library! {
///     fn build(registry: &dflow_core::registry::Registry) {
///         registry.register_spec(my_component_spec());
///     }
/// }
/// ```
#[macro_export]
macro_rules! register_library {
    (fn $build_fn:ident($registry_param:ident: &$registry_ty:path) $body:block) => {
        static DFLOW_LIBRARY_REGISTRY: ::std::sync::OnceLock<::std::sync::Arc<$registry_ty>> =
            ::std::sync::OnceLock::new();

        fn $build_fn($registry_param: &$registry_ty) $body

        fn dflow_library_registry() -> *mut $registry_ty {
            let registry = DFLOW_LIBRARY_REGISTRY.get_or_init(|| {
                let registry = ::std::sync::Arc::new(<$registry_ty>::new());
                $build_fn(&registry);
                registry
            });
            ::std::sync::Arc::as_ptr(registry) as *mut $registry_ty
        }

        static DFLOW_REGISTRY_SLOT: ::std::sync::OnceLock<*mut $registry_ty> = ::std::sync::OnceLock::new();

        #[no_mangle]
        pub unsafe extern "C" fn dflow_get_component_registry() -> *mut *mut $registry_ty {
            let slot = DFLOW_REGISTRY_SLOT.get_or_init(|| dflow_library_registry());
            slot as *const *mut $registry_ty as *mut *mut $registry_ty
        }
    };
}
