// umbra-flags: reflection flag words understood by the native object system.
//
// Only the bits the weaver emits or the runtime inspects are listed here. Bit
// values follow the engine's EPropertyFlags / EFunctionFlags / EClassFlags /
// EStructFlags layouts so manifests can be handed to native code unchanged.

// ---------------------------------------------------------------------------
// Property flags (CPF_*): u64
// ---------------------------------------------------------------------------

pub const CPF_NONE: u64 = 0;
/// Editable from property panels.
pub const CPF_EDIT: u64 = 0x0000_0000_0000_0001;
/// Function parameter passed as const.
pub const CPF_CONST_PARM: u64 = 0x0000_0000_0000_0002;
/// Visible to visual scripting.
pub const CPF_BLUEPRINT_VISIBLE: u64 = 0x0000_0000_0000_0004;
pub const CPF_BLUEPRINT_READ_ONLY: u64 = 0x0000_0000_0000_0010;
/// Replicated property.
pub const CPF_NET: u64 = 0x0000_0000_0000_0020;
/// Function parameter.
pub const CPF_PARM: u64 = 0x0000_0000_0000_0080;
/// Value is copied back to the caller after the call.
pub const CPF_OUT_PARM: u64 = 0x0000_0000_0000_0100;
/// Zero-filled memory is a valid initial value.
pub const CPF_ZERO_CONSTRUCTOR: u64 = 0x0000_0000_0000_0200;
pub const CPF_RETURN_PARM: u64 = 0x0000_0000_0000_0400;
pub const CPF_TRANSIENT: u64 = 0x0000_0000_0000_2000;
/// Loaded from the class's config section.
pub const CPF_CONFIG: u64 = 0x0000_0000_0000_4000;
pub const CPF_SAVE_GAME: u64 = 0x0000_0000_0100_0000;
/// Parameter passed by reference.
pub const CPF_REFERENCE_PARM: u64 = 0x0000_0000_0800_0000;
/// Multicast delegate assignable from visual scripting.
pub const CPF_BLUEPRINT_ASSIGNABLE: u64 = 0x0000_0000_1000_0000;
/// Plain old data: bitwise copyable, no destructor.
pub const CPF_IS_PLAIN_OLD_DATA: u64 = 0x0000_0000_4000_0000;
/// Replicated with a change notification function.
pub const CPF_REP_NOTIFY: u64 = 0x0000_0001_0000_0000;
pub const CPF_NO_DESTRUCTOR: u64 = 0x0000_0010_0000_0000;
pub const CPF_EXPOSE_ON_SPAWN: u64 = 0x0001_0000_0000_0000;
pub const CPF_NATIVE_ACCESS_SPECIFIER_PUBLIC: u64 = 0x0010_0000_0000_0000;
pub const CPF_NATIVE_ACCESS_SPECIFIER_PROTECTED: u64 = 0x0020_0000_0000_0000;
pub const CPF_NATIVE_ACCESS_SPECIFIER_PRIVATE: u64 = 0x0040_0000_0000_0000;

/// Flags that only make sense on function parameters.
pub const CPF_PARM_FLAGS: u64 =
    CPF_PARM | CPF_OUT_PARM | CPF_RETURN_PARM | CPF_REFERENCE_PARM | CPF_CONST_PARM;

// ---------------------------------------------------------------------------
// Function flags (FUNC_*): u32
// ---------------------------------------------------------------------------

pub const FUNC_NONE: u32 = 0;
pub const FUNC_FINAL: u32 = 0x0000_0001;
pub const FUNC_BLUEPRINT_AUTHORITY_ONLY: u32 = 0x0000_0004;
/// Network replicated function.
pub const FUNC_NET: u32 = 0x0000_0040;
pub const FUNC_NET_RELIABLE: u32 = 0x0000_0080;
/// Implemented outside the script VM (every managed function is native from the engine's view).
pub const FUNC_NATIVE: u32 = 0x0000_0400;
/// Dispatched as an event (may be implemented by visual scripting).
pub const FUNC_EVENT: u32 = 0x0000_0800;
pub const FUNC_STATIC: u32 = 0x0000_2000;
pub const FUNC_NET_MULTICAST: u32 = 0x0000_4000;
pub const FUNC_PUBLIC: u32 = 0x0002_0000;
pub const FUNC_PRIVATE: u32 = 0x0004_0000;
pub const FUNC_PROTECTED: u32 = 0x0008_0000;
/// Executed on the server when called by an owning client.
pub const FUNC_NET_SERVER: u32 = 0x0020_0000;
pub const FUNC_HAS_OUT_PARMS: u32 = 0x0040_0000;
/// Parameters carry default value metadata.
pub const FUNC_HAS_DEFAULTS: u32 = 0x0080_0000;
/// Executed on the owning client when called by the server.
pub const FUNC_NET_CLIENT: u32 = 0x0100_0000;
pub const FUNC_BLUEPRINT_CALLABLE: u32 = 0x0400_0000;
/// Overridable from visual scripting.
pub const FUNC_BLUEPRINT_EVENT: u32 = 0x0800_0000;
pub const FUNC_BLUEPRINT_PURE: u32 = 0x1000_0000;
pub const FUNC_CONST: u32 = 0x4000_0000;

/// Any of the remote-procedure-call routing bits.
pub const FUNC_NET_FUNC_FLAGS: u32 = FUNC_NET | FUNC_NET_SERVER | FUNC_NET_CLIENT | FUNC_NET_MULTICAST;

/// True when `flags` describes a remote procedure call.
#[inline]
pub const fn is_rpc(flags: u32) -> bool {
    flags & (FUNC_NET_SERVER | FUNC_NET_CLIENT | FUNC_NET_MULTICAST) != 0
}

/// True when `flags` describes a dispatch point native code may override.
#[inline]
pub const fn is_event(flags: u32) -> bool {
    flags & FUNC_BLUEPRINT_EVENT != 0
}

// ---------------------------------------------------------------------------
// Class flags (CLASS_*): u32
// ---------------------------------------------------------------------------

pub const CLASS_NONE: u32 = 0;
pub const CLASS_ABSTRACT: u32 = 0x0000_0001;
pub const CLASS_DEFAULT_CONFIG: u32 = 0x0000_0002;
pub const CLASS_CONFIG: u32 = 0x0000_0004;
pub const CLASS_TRANSIENT: u32 = 0x0000_0008;
pub const CLASS_NOT_PLACEABLE: u32 = 0x0000_0200;
pub const CLASS_INTERFACE: u32 = 0x0000_4000;
pub const CLASS_HIDDEN: u32 = 0x0100_0000;
pub const CLASS_DEPRECATED: u32 = 0x0200_0000;

// ---------------------------------------------------------------------------
// Struct flags (STRUCT_*): u32
// ---------------------------------------------------------------------------

pub const STRUCT_NONE: u32 = 0;
pub const STRUCT_ATOMIC: u32 = 0x0000_0010;
pub const STRUCT_IMMUTABLE: u32 = 0x0000_0020;
/// Bitwise copyable; the managed side may bulk-copy it.
pub const STRUCT_IS_PLAIN_OLD_DATA: u32 = 0x0000_2000;
pub const STRUCT_NO_DESTRUCTOR: u32 = 0x0000_4000;
pub const STRUCT_ZERO_CONSTRUCTOR: u32 = 0x0000_8000;

// ---------------------------------------------------------------------------
// Replication lifetime conditions (COND_*)
// ---------------------------------------------------------------------------

pub const COND_NONE: u8 = 0;
pub const COND_INITIAL_ONLY: u8 = 1;
pub const COND_OWNER_ONLY: u8 = 2;
pub const COND_SKIP_OWNER: u8 = 3;
pub const COND_SIMULATED_ONLY: u8 = 4;
pub const COND_AUTONOMOUS_ONLY: u8 = 5;
pub const COND_SIMULATED_OR_PHYSICS: u8 = 6;
pub const COND_INITIAL_OR_OWNER: u8 = 7;
pub const COND_CUSTOM: u8 = 8;
pub const COND_REPLAY_OR_OWNER: u8 = 9;
pub const COND_REPLAY_ONLY: u8 = 10;
pub const COND_SIMULATED_ONLY_NO_REPLAY: u8 = 11;
pub const COND_SIMULATED_OR_PHYSICS_NO_REPLAY: u8 = 12;
pub const COND_SKIP_REPLAY: u8 = 13;
pub const COND_DYNAMIC: u8 = 14;
pub const COND_NEVER: u8 = 15;

const LIFETIME_CONDITIONS: &[(&str, u8)] = &[
    ("None", COND_NONE),
    ("InitialOnly", COND_INITIAL_ONLY),
    ("OwnerOnly", COND_OWNER_ONLY),
    ("SkipOwner", COND_SKIP_OWNER),
    ("SimulatedOnly", COND_SIMULATED_ONLY),
    ("AutonomousOnly", COND_AUTONOMOUS_ONLY),
    ("SimulatedOrPhysics", COND_SIMULATED_OR_PHYSICS),
    ("InitialOrOwner", COND_INITIAL_OR_OWNER),
    ("Custom", COND_CUSTOM),
    ("ReplayOrOwner", COND_REPLAY_OR_OWNER),
    ("ReplayOnly", COND_REPLAY_ONLY),
    ("SimulatedOnlyNoReplay", COND_SIMULATED_ONLY_NO_REPLAY),
    ("SimulatedOrPhysicsNoReplay", COND_SIMULATED_OR_PHYSICS_NO_REPLAY),
    ("SkipReplay", COND_SKIP_REPLAY),
    ("Dynamic", COND_DYNAMIC),
    ("Never", COND_NEVER),
];

/// Look up a lifetime condition by its specifier name (`"OwnerOnly"`).
pub fn lifetime_condition(name: &str) -> Option<u8> {
    LIFETIME_CONDITIONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, v)| v)
}

/// Specifier name of a lifetime condition value.
pub fn lifetime_condition_name(value: u8) -> Option<&'static str> {
    LIFETIME_CONDITIONS
        .iter()
        .find(|&&(_, v)| v == value)
        .map(|&(n, _)| n)
}
