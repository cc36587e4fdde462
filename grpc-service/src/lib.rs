pub mod grpc_protocol {
    tonic::include_proto!("hello");
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
