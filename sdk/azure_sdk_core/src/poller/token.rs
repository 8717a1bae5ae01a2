//! Resume token encoding.
//!
//! A token is JSON: `{"type": "{client}.{operation};{kind}", "state": {...}}`.
//! The tag is checked against the expected [`PollerType`] and a known kind
//! before the state is deserialized.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::strategy::{Strategy, Tracker, TrackerState};
use super::PollerType;
use crate::error::{Error, Result};

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    #[serde(rename = "type")]
    tag: String,
    state: &'a TrackerState,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    state: Option<Value>,
}

pub(crate) fn encode(poller_type: &PollerType, tracker: &Tracker) -> Result<String> {
    let envelope = EnvelopeOut {
        tag: format!("{};{}", poller_type, tracker.strategy.kind()),
        state: &tracker.state,
    };
    Ok(serde_json::to_string(&envelope)?)
}

pub(crate) fn decode(token: &str, expected: &PollerType) -> Result<Tracker> {
    let envelope: EnvelopeIn = serde_json::from_str(token)
        .map_err(|e| Error::Poller(format!("malformed resume token: {e}")))?;
    let (poller_type, kind) = envelope
        .tag
        .split_once(';')
        .ok_or_else(|| Error::Poller(format!("resume token type {:?} has no poller kind", envelope.tag)))?;
    if poller_type != expected.as_str() {
        return Err(Error::Poller(format!(
            "resume token is for {poller_type:?}, expected {:?}",
            expected.as_str()
        )));
    }
    let strategy = Strategy::from_kind(kind)
        .ok_or_else(|| Error::Poller(format!("unknown poller kind {kind:?} in resume token")))?;
    let state = envelope
        .state
        .ok_or_else(|| Error::Poller("resume token has no state".into()))?;
    let state: TrackerState = serde_json::from_value(state)
        .map_err(|e| Error::Poller(format!("invalid resume token state: {e}")))?;
    Ok(Tracker { strategy, state })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poller_type() -> PollerType {
        PollerType::new("fake", "poller").unwrap()
    }

    fn tracker() -> Tracker {
        Tracker {
            strategy: Strategy::OperationLocation,
            state: TrackerState {
                method: "PUT".into(),
                orig_url: "https://contoso.com/widgets/1".into(),
                poll_url: "https://contoso.com/operations/1".into(),
                location_url: None,
                resource_location: None,
                final_state_via: None,
                status: "InProgress".into(),
            },
        }
    }

    #[test]
    fn token_carries_type_and_kind() {
        let token = encode(&poller_type(), &tracker()).unwrap();
        let value: Value = serde_json::from_str(&token).unwrap();
        assert_eq!(value["type"], "fake.poller;opPoller");
        assert_eq!(value["state"]["pollUrl"], "https://contoso.com/operations/1");
        assert!(value["state"].get("locationUrl").is_none());

        assert_eq!(decode(&token, &poller_type()).unwrap(), tracker());
    }

    #[test]
    fn invalid_tokens_are_rejected() {
        let cases = [
            ("invalid", "invalid"),
            ("empty", "{}"),
            ("wrong type", r#"{"type": 1}"#),
            ("missing kind", r#"{"type": "fake.poller"}"#),
            ("mismatched type", r#"{"type": "faker.poller;opPoller"}"#),
            ("malformed kind", r#"{"type": "fake.poller;dummy"}"#),
            ("missing state", r#"{"type": "fake.poller;opPoller"}"#),
            ("bad state", r#"{"type": "fake.poller;opPoller", "state": {"pollUrl": 3}}"#),
        ];
        for (name, token) in cases {
            let err = decode(token, &poller_type()).unwrap_err();
            assert!(matches!(err, Error::Poller(_)), "{name}: {err}");
        }
    }

    #[test]
    fn tag_is_checked_before_state() {
        // A state that would not deserialize must not mask a type mismatch.
        let token = r#"{"type": "other.op;opPoller", "state": "garbage"}"#;
        let err = decode(token, &poller_type()).unwrap_err();
        assert!(err.to_string().contains("expected"));
    }
}
