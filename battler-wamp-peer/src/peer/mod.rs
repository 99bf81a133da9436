mod call;
pub mod connector;
mod context;
mod dispatcher;
mod peer;
mod publication;
mod registration;
mod session;
mod subscription;
mod supervisor;

pub use call::{
    PendingCall,
    ProgressivePendingCall,
    RpcCall,
    RpcResult,
};
pub use peer::{
    AuthConfig,
    Peer,
    PeerConfig,
    WebSocketConfig,
};
pub use publication::{
    Publication,
    PublishOptions,
    PublishedEvent,
};
pub use registration::{
    Invocation,
    Procedure,
    ProcedureOptions,
    ProcedureOutput,
    Registration,
    RegistrationEvent,
    RpcYield,
};
pub use session::{
    Session,
    SessionStatus,
};
pub use subscription::{
    ReceivedEvent,
    Subscription,
    SubscriptionOptions,
};
pub use supervisor::ConnectionLease;
