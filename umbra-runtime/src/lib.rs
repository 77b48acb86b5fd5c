// umbra-runtime: managed half of the bridge.
// Owns the handle table, shadow-object construction, native ↔ managed calls,
// marshaling, and the plugin load/unload lifecycle. Woven script code and the
// native host reach the runtime only through the items exported here.

pub mod api;
pub mod error;
pub mod logging;
pub mod ffi_guard;
pub mod wide;
pub mod load_context;
pub mod handles;
pub mod jobs;
pub mod object;
pub mod object_ref;
pub mod values;
pub mod registry;
pub mod resolver;
pub mod construct;
pub mod bindings;
pub mod invoke;
pub mod delegates;
pub mod marshal;
pub mod plugins;
pub mod exports;

#[cfg(any(test, feature = "fake-native"))]
#[doc(hidden)]
pub mod fake_native;

pub use api::{api, init_api, is_api_initialized};
pub use error::{check_status, status_infallible, UmbraError, UmbraResult};
pub use ffi_guard::{ffi_boundary, guarded, guarded_status};
pub use load_context::{ContextId, LoadContext};
pub use handles::{handles, HandleKind, HandleTable, ManagedRef};
pub use jobs::{startup_jobs, JobReport, StartupJobs};
pub use object::{ManagedClass, ManagedObject, ObjectBase};
pub use object_ref::{ObjectRef, ScriptInterface, SoftObjectRef, SubclassOf, WeakObjectRef};
pub use values::{Delegate, MulticastDelegate, Name, ScriptDelegate, Text};
pub use registry::{
    Assembly, AssemblyBuilder, AssemblyRegistration, MethodBody, MethodInfo, ModuleInterface,
    TypeDescriptor, TypeInfo, TypeKind,
};
pub use bindings::{
    ClassBinding, FunctionBinding, ModuleCell, PropertyBinding, PropertyOwner, ResolvedFunction,
    ResolvedParam, ResolvedStruct, StructBinding,
};
pub use construct::{create_object, dispose_object, find_shadow};
pub use delegates::{bind_delegate, invoke_delegate, unbind_delegate, ManagedDelegate};
pub use invoke::{call_native, call_native_static, raise, receiver, ParamBuffer};
pub use marshal::{Blittable, BlittableValue, Marshaller, NativeEnum, NativeStruct};
pub use plugins::{plugins, AssemblySource, PluginDescriptor, PluginLoader, UnloadPolicy};

// Re-export the C ABI types generated code refers to.
pub use umbra_ffi::{
    BridgeStatus, GcHandle, NameHandle, NativeClassPtr, NativeFunctionPtr, NativeObjectPtr,
    NativePropertyPtr, NativeStructPtr, WeakObjectHandle,
};

#[doc(hidden)]
pub extern crate inventory as __inventory;

/// Generates the `umbra_init` / `umbra_shutdown` exports in the host's cdylib.
///
/// ```ignore
/// umbra_runtime::entry!();
/// ```
#[macro_export]
macro_rules! entry {
    () => {
        mod __umbra_native_entry {
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn umbra_init(
                api: *const $crate::__ffi::NativeApi,
                slots: *const $crate::__ffi::ExportSlot,
                slot_count: u32,
                error: *mut $crate::__ffi::ErrorBuffer,
            ) -> $crate::BridgeStatus {
                unsafe { $crate::exports::init(api, slots, slot_count, error) }
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn umbra_shutdown() {
                $crate::exports::shutdown()
            }
        }
    };
}

/// Exports an assembly registration function from a plugin dynamic library.
///
/// ```ignore
/// umbra_runtime::export_assembly!(crate::register_assembly);
/// ```
#[macro_export]
macro_rules! export_assembly {
    ($register:path) => {
        #[unsafe(no_mangle)]
        pub fn umbra_register_assembly(builder: &mut $crate::AssemblyBuilder) {
            $register(builder)
        }
    };
}

/// Registers an assembly linked into the host binary. Such assemblies are
/// shared: they load once into the default context and are never unloaded.
///
/// ```ignore
/// umbra_runtime::link_assembly!("GameCore", crate::register_assembly);
/// ```
#[macro_export]
macro_rules! link_assembly {
    ($name:expr, $register:path) => {
        $crate::__inventory::submit! {
            $crate::AssemblyRegistration { name: $name, register: $register }
        }
    };
}

#[doc(hidden)]
pub use umbra_ffi as __ffi;
