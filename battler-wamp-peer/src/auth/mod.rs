mod challenge;
mod wamp_cra;

pub use challenge::{
    Challenge,
    ChallengeHandler,
};
pub use wamp_cra::WampCraChallengeHandler;
