// umbra-fixture: a script module woven at build time. The authored source is
// script/lib.rs; what compiles here is the weaver's output.

include!(concat!(env!("OUT_DIR"), "/woven/lib.rs"));

umbra_runtime::link_assembly!("Fixture", crate::register_assembly);
