// Error types for the weaver.
//
// `AuthoringError` describes reflected code the native object system cannot
// represent. Any of them aborts the weave of the module it was found in.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthoringError {
    #[error("`{item}`: unknown specifier `{specifier}`")]
    UnknownSpecifier { item: String, specifier: String },
    #[error("`{item}`: specifier `{specifier}` expects {expected}")]
    SpecifierValue {
        item: String,
        specifier: String,
        expected: &'static str,
    },
    #[error("`{0}` is declared twice in this module")]
    DuplicateType(String),
    #[error("`{0}`: reflected types cannot be generic")]
    GenericType(String),
    #[error("`{0}`: reflected classes and structs need named fields")]
    UnnamedFields(String),
    #[error("`{item}`: type `{ty}` has no native representation")]
    UnsupportedType { item: String, ty: String },
    #[error("`{class}`: parent `{parent}` is not a known class")]
    UnknownParent { class: String, parent: String },
    #[error("inheritance cycle through `{0}`")]
    InheritanceCycle(String),
    #[error("struct `{0}` contains itself")]
    StructCycle(String),
    #[error("metadata for struct `{0}` constructed twice")]
    DuplicateMetadata(String),
    #[error("`{strukt}` declares `{method}`, which is generated")]
    ReservedMethod { strukt: String, method: String },
    #[error("`{class}.{function}`: remote procedure calls cannot return a value")]
    RpcReturnValue { class: String, function: String },
    #[error("`{class}.{function}`: remote procedure calls cannot be events or overrides")]
    RpcEvent { class: String, function: String },
    #[error("`{class}.{function}`: only one of ImplementableEvent, NativeEvent and the RPC specifiers may be given")]
    ConflictingSpecifiers { class: String, function: String },
    #[error("`{class}.{function}` is declared as a new function but overrides event `{ancestor}.{function}`")]
    RedeclaredEvent {
        class: String,
        function: String,
        ancestor: String,
    },
    #[error("`{class}.{function}` is marked Override but no ancestor declares an event with that name")]
    NothingToOverride { class: String, function: String },
    #[error("`{class}.{function}` is declared twice")]
    DuplicateFunction { class: String, function: String },
    #[error("`{class}`: `{interface}` is not a known interface")]
    UnknownInterface { class: String, interface: String },
    #[error("`{class}`: interface `{interface}` has no function `{function}`")]
    NotInInterface {
        class: String,
        interface: String,
        function: String,
    },
    #[error("`{item}`: {problem}")]
    Signature { item: String, problem: &'static str },
    #[error("`{class}`: at most one constructor may be declared")]
    DuplicateConstructor { class: String },
    #[error("`{class}.{property}`: networked property of type `{kind}` cannot be replicated")]
    NetworkedKind {
        class: String,
        property: String,
        kind: String,
    },
    #[error("`{class}.{property}`: replication notify `{notify}` {problem}")]
    ReplicationNotify {
        class: String,
        property: String,
        notify: String,
        problem: &'static str,
    },
    #[error("`{class}.{property}`: unknown lifetime condition `{condition}`")]
    LifetimeCondition {
        class: String,
        property: String,
        condition: String,
    },
    #[error("`{class}.{property}`: {accessor} `{function}` {problem}")]
    AccessorShape {
        class: String,
        property: String,
        accessor: &'static str,
        function: String,
        problem: &'static str,
    },
    #[error("`{class}.{property}`: reflected properties live in native memory and cannot be borrowed mutably")]
    PropertyBorrow { class: String, property: String },
    #[error("enum `{0}`: reflected enums need at least one unit variant with an integer discriminant")]
    EnumShape(String),
    #[error("`{item}`: malformed marker attribute: {message}")]
    MalformedAttribute { item: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WeaveError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: parse error: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("{path}: invalid config: {message}")]
    Config { path: PathBuf, message: String },
    #[error("{path}: invalid manifest: {message}")]
    Manifest { path: PathBuf, message: String },
    #[error("module `{module}`: {path} has no `{name}` module file")]
    MissingModuleFile {
        module: String,
        path: PathBuf,
        name: String,
    },
    #[error("module `{0}` is not declared in the config")]
    UnknownModule(String),
    #[error("module `{module}` depends on unknown module `{dependency}`")]
    UnknownDependency { module: String, dependency: String },
    #[error("module dependency cycle through `{0}`")]
    ModuleCycle(String),
    #[error("module `{module}`: dependency `{dependency}` has no manifest; weave it first")]
    MissingManifest { module: String, dependency: String },
    #[error("module `{module}`: {source}")]
    Authoring {
        module: String,
        #[source]
        source: AuthoringError,
    },
    #[error("module `{module}` skipped: dependency `{dependency}` failed")]
    DependencyFailed { module: String, dependency: String },
    #[error("{failed} of {total} modules failed to weave")]
    Failed { failed: usize, total: usize },
}

impl WeaveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WeaveError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type WeaveResult<T> = Result<T, WeaveError>;
