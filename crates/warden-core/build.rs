/// Builds the gRPC client and server code for `proto/warden.proto` using
/// `tonic-prost-build`.
///
/// The generated module is exposed as `warden_core::proto` and the encoded
/// file descriptor set is written next to it so the server can publish it
/// through gRPC reflection.
///
/// # Files and Paths
///
/// - Proto file: `proto/warden.proto`
/// - Includes: `proto/`
/// - Descriptor: `$OUT_DIR/warden_descriptor.bin`
///
/// # Panics
///
/// Panics if `OUT_DIR` is unset or if code generation fails (for example when
/// `protoc` is not installed).
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    println!("cargo:rerun-if-changed=proto/warden.proto");

    tonic_prost_build::configure()
        .file_descriptor_set_path(out_dir.join("warden_descriptor.bin"))
        .compile_protos(&["proto/warden.proto"], &["proto"])
        .unwrap();
}
