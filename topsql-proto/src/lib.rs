//! This crate just abstracts the automated `protobuf` codegen.
//!
//! It essentially just encapsulates the build steps, and exports generated types. The collector
//! exposes a single bidirectional streaming method, see [`agent::COLLECT_PATH`].

pub mod agent {
    tonic::include_proto!("agent");

    /// Fully qualified gRPC path of the collector's streaming method.
    pub const COLLECT_PATH: &str = "/agent.Agent/CollectTiDB";
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::agent::*;

    #[test]
    fn request_survives_encoding() {
        let request = CpuTimeRequest {
            timestamps: vec![1, 2],
            cpu_times: vec![100, 200],
            normalized_sql: "select ? from t1".into(),
        };

        let bytes = request.encode_to_vec();
        let decoded = CpuTimeRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn empty_response_encodes_to_nothing() {
        assert!(CollectResponse {}.encode_to_vec().is_empty());
    }
}
