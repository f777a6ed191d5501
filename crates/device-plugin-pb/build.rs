use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Prefer a system protoc when one is configured.
    if env::var_os("PROTOC").is_none() {
        env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    println!("cargo:rerun-if-changed=proto/api.proto");

    // The plugin is a Registration client and a DevicePlugin server; tests
    // play the kubelet side, so both halves are generated.
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/api.proto"], &["proto"])?;
    Ok(())
}
