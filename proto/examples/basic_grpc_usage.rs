use snap_plugin_proto::v1::{Ack, Empty, GetConfigPolicyReply, KillArg};

#[cfg(feature = "gen-tonic")]
use snap_plugin_proto::v1::publisher_server::{Publisher, PublisherServer};
#[cfg(feature = "gen-tonic")]
use snap_plugin_proto::v1::PubProcArg;

#[cfg(feature = "gen-tonic")]
#[derive(Debug, Default)]
pub struct StdoutPublisher;

#[cfg(feature = "gen-tonic")]
#[tonic::async_trait]
impl Publisher for StdoutPublisher {
    async fn publish(
        &self,
        request: tonic::Request<PubProcArg>,
    ) -> Result<tonic::Response<Ack>, tonic::Status> {
        for metric in request.into_inner().metrics {
            println!("{:?}", metric);
        }
        Ok(tonic::Response::new(Ack {}))
    }

    async fn ping(
        &self,
        _request: tonic::Request<Empty>,
    ) -> Result<tonic::Response<Ack>, tonic::Status> {
        Ok(tonic::Response::new(Ack {}))
    }

    async fn kill(
        &self,
        request: tonic::Request<KillArg>,
    ) -> Result<tonic::Response<Ack>, tonic::Status> {
        println!("Kill requested: {}", request.into_inner().reason);
        Ok(tonic::Response::new(Ack {}))
    }

    async fn get_config_policy(
        &self,
        _request: tonic::Request<Empty>,
    ) -> Result<tonic::Response<GetConfigPolicyReply>, tonic::Status> {
        Ok(tonic::Response::new(GetConfigPolicyReply::default()))
    }
}

fn main() {
    let kill = KillArg {
        reason: "host shutting down".to_string(),
    };

    println!("Created kill request: {}", kill.reason);

    #[cfg(feature = "gen-tonic")]
    {
        let _server = PublisherServer::new(StdoutPublisher);
        println!("gRPC service created successfully!");
    }

    #[cfg(not(feature = "gen-tonic"))]
    {
        println!("gRPC features not enabled - only message types available");
    }
}
