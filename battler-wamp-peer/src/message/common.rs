use anyhow::Error;
use battler_wamp_values::{
    Dictionary,
    Value,
};

use crate::{
    core::{
        close::CloseReason,
        error::WampError,
        id::Id,
        uri::Uri,
    },
    message::message::{
        AbortMessage,
        CancelMessage,
        ErrorMessage,
        GoodbyeMessage,
        Message,
    },
};

/// Error URI reported for a registered procedure that failed to handle an invocation.
pub const INVOCATION_EXCEPTION: &str = "thruway.error.invocation_exception";

/// Error URI reported when the peer cannot answer an authentication challenge.
pub const CHALLENGE_EXCEPTION: &str = "thruway.error.challenge_exception";

/// Error URI reported when the router sends a message the peer cannot accept.
pub const PROTOCOL_VIOLATION: &str = "wamp.error.protocol_violation";

/// Message type code of INVOCATION, used in ERROR messages answering one.
pub const INVOCATION_TAG: u64 = 68;

fn message_details(message: String) -> Dictionary {
    Dictionary::from_iter([("message".to_owned(), Value::String(message))])
}

pub fn abort_message(reason: Uri, message: String) -> Message {
    Message::Abort(AbortMessage {
        details: message_details(message),
        reason,
        ..Default::default()
    })
}

pub fn abort_message_for_challenge_error(error: &Error) -> Message {
    abort_message(
        Uri::from_known(CHALLENGE_EXCEPTION),
        format!("{error:#}"),
    )
}

pub fn abort_message_for_protocol_violation(error: &Error) -> Message {
    abort_message(Uri::from_known(PROTOCOL_VIOLATION), error.to_string())
}

pub fn goodbye_with_close_reason(close_reason: CloseReason) -> Message {
    Message::Goodbye(GoodbyeMessage {
        details: Dictionary::default(),
        reason: close_reason.uri(),
    })
}

pub fn goodbye_and_out() -> Message {
    goodbye_with_close_reason(CloseReason::GoodbyeAndOut)
}

pub fn cancel(request: Id) -> Message {
    Message::Cancel(CancelMessage {
        call_request: request,
        options: Dictionary::default(),
    })
}

/// Converts a failed invocation into the ERROR message answering it.
///
/// A [`WampError`] keeps its URI and payload. Any other error is reported as
/// [`INVOCATION_EXCEPTION`] with the error text in the details.
pub fn invocation_error(request: Id, error: &Error) -> Message {
    match error.downcast_ref::<WampError>() {
        Some(error) => {
            let mut details = error.details.clone();
            details
                .entry("message".to_owned())
                .or_insert_with(|| Value::String(error.to_string()));
            Message::Error(ErrorMessage {
                request_type: INVOCATION_TAG,
                request,
                details,
                error: error.error.clone(),
                arguments: error.arguments.clone(),
                arguments_keyword: error.arguments_keyword.clone(),
            })
        }
        None => Message::Error(ErrorMessage {
            request_type: INVOCATION_TAG,
            request,
            details: message_details(format!("{error:#}")),
            error: Uri::from_known(INVOCATION_EXCEPTION),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod common_test {
    use anyhow::Error;
    use battler_wamp_values::{
        List,
        Value,
    };

    use crate::{
        core::{
            error::WampError,
            id::Id,
            uri::Uri,
        },
        message::{
            common::{
                goodbye_and_out,
                invocation_error,
            },
            message::Message,
        },
    };

    #[test]
    fn converts_generic_invocation_failure() {
        let request = Id::try_from(99).unwrap();
        assert_matches::assert_matches!(invocation_error(request, &Error::msg("handler failed")), Message::Error(message) => {
            assert_eq!(message.request_type, 68);
            assert_eq!(message.request, request);
            assert_eq!(message.error.as_ref(), "thruway.error.invocation_exception");
            assert_eq!(message.details.get("message"), Some(&Value::String("handler failed".to_owned())));
        });
    }

    #[test]
    fn keeps_wamp_error_payload() {
        let mut error = WampError::new(
            Uri::try_from("com.myapp.error.out_of_stock").unwrap(),
            Uri::try_from("com.myapp.order").unwrap(),
        );
        error.arguments = List::from_iter([Value::Integer(3)]);
        assert_matches::assert_matches!(invocation_error(Id::MIN, &error.into()), Message::Error(message) => {
            assert_eq!(message.error.as_ref(), "com.myapp.error.out_of_stock");
            assert_eq!(message.arguments, List::from_iter([Value::Integer(3)]));
        });
    }

    #[test]
    fn replies_goodbye_and_out() {
        assert_matches::assert_matches!(goodbye_and_out(), Message::Goodbye(message) => {
            assert_eq!(message.reason.as_ref(), "wamp.close.goodbye_and_out");
        });
    }
}
