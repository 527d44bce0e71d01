//! Generated tonic/prost bindings for the two client-facing gRPC
//! surfaces (spec §6). `proxy-server`'s `activities::{v1,v2}` modules
//! translate between these wire types and `proxy_core::canonical` --
//! nothing downstream of this crate branches on protocol version.

pub mod common {
    tonic::include_proto!("proxy.common");
}

pub mod v1 {
    tonic::include_proto!("proxy.v1");
}

pub mod v2 {
    tonic::include_proto!("proxy.v2");
}

/// Encoded `FileDescriptorSet` for both protocol revisions, consumed by
/// `tonic-reflection` so `grpcurl`/`grpcui` can discover the service
/// without a local copy of the `.proto` files.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("proxy_descriptor.bin");
