fn main() -> std::io::Result<()> {
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()
            .map_err(|e| std::io::Error::other(format!("{e:?}")))?;
        // build scripts run single threaded
        unsafe { std::env::set_var("PROTOC", protoc) };
    }

    prost_build::compile_protos(&["proto/vector_tile.proto"], &["proto/"])
}
