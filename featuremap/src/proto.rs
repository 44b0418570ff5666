//! Wire messages. The generated code is committed so that building the
//! crate doesn't require `protoc`; the sources live in `proto/`.

pub mod featuremap {
    include!("./generated/featuremap.rs");
}

pub mod bus {
    include!("./generated/bus.rs");
}
