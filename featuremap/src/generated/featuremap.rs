/// / A drawn map feature with its display properties.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Feature {
    /// / Globally unique, generated by the drawing client.
    #[prost(string, tag="1")]
    pub id: ::prost::alloc::string::String,
    /// / The serialized shape, opaque to the sync engine.
    #[prost(bytes="vec", tag="2")]
    pub geometry: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag="3")]
    pub color: ::prost::alloc::string::String,
    #[prost(string, tag="4")]
    pub text: ::prost::alloc::string::String,
}
/// / The payload of every message published on a room topic.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    /// / The publishing client's session id.
    #[prost(string, tag="1")]
    pub id: ::prost::alloc::string::String,
    /// / One of "clear", "AddFeature" or "ModifyFeature".
    #[prost(string, tag="2")]
    pub r#type: ::prost::alloc::string::String,
    /// / Present for "AddFeature" and "ModifyFeature".
    #[prost(message, optional, tag="3")]
    pub data: ::core::option::Option<Feature>,
}
