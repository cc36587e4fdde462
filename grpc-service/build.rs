fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("protoc path: {}", protobuf_src::protoc().to_string_lossy());
    std::env::set_var("PROTOC", protobuf_src::protoc());
    tonic_prost_build::configure()
        .compile_protos(&["proto/hello/hello.proto"], &["proto/hello"])?;
    Ok(())
}
