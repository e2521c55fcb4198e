/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

/// Build script – compiles protobuf definitions into Rust source code.
///
/// tonic-build wraps prost-build and additionally generates tonic server/client
/// stubs.  The generated files are written to `OUT_DIR` (managed by Cargo) and
/// pulled into the crate via `tonic::include_proto!` in `src/proto/mod.rs`.
///
/// Prerequisites
/// -------------
/// None.  When `PROTOC` is not set, the vendored `protoc` binary from
/// `protoc-bin-vendored` is used.  Set `PROTOC` to override it.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = "proto";
    let proto_file = format!("{}/lifering.proto", proto_root);

    // Tell Cargo to re-run this build script when the proto file changes
    println!("cargo:rerun-if-changed={}", proto_file);
    println!("cargo:rerun-if-env-changed=PROTOC");

    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()
            .map_err(|e| format!("vendored protoc not found: {e:?}"))?;
        std::env::set_var("PROTOC", protoc);
    }

    tonic_build::configure()
        // Broker serves BrokerService and dials NodeService; nodes serve
        // NodeService; the driver dials BrokerService.
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[proto_file.as_str()], // proto files to compile
            &[proto_root],          // directories to search for imports
        )?;

    Ok(())
}
