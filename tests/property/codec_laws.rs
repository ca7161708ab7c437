//! Property-based tests for the codecs and id validation

use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use shelf::store::validate_id;
use shelf::Format;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Widget {
    name: String,
    count: i64,
    #[serde(default)]
    tags: Vec<String>,
}

fn widget_strategy() -> impl Strategy<Value = Widget> {
    (
        "[a-zA-Z][a-zA-Z0-9_-]{0,20}",
        any::<i64>(),
        prop::collection::vec("[a-zA-Z][a-zA-Z0-9]{0,8}", 0..4),
    )
        .prop_map(|(name, count, tags)| Widget { name, count, tags })
}

/// Decoding what was encoded yields the same value, in every format
#[test]
fn test_codec_round_trip_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&widget_strategy(), |widget| {
            for format in Format::ALL {
                let bytes = format.encode(&widget).unwrap();
                let decoded: Widget = format.decode(&bytes).unwrap();
                prop_assert_eq!(&decoded, &widget, "format {}", format);
            }
            Ok(())
        })
        .unwrap();
}

/// Encoding is a pure function of the value
#[test]
fn test_encoding_determinism_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&widget_strategy(), |widget| {
            for format in Format::ALL {
                prop_assert_eq!(
                    format.encode(&widget).unwrap(),
                    format.encode(&widget.clone()).unwrap()
                );
            }
            Ok(())
        })
        .unwrap();
}

proptest! {
    #[test]
    fn test_alphanumeric_ids_accepted(id in "[a-zA-Z0-9-]{1,64}") {
        prop_assert!(validate_id(&id).is_ok());
    }

    #[test]
    fn test_ids_with_other_characters_rejected(
        prefix in "[a-z0-9]{0,8}",
        bad in "[^a-zA-Z0-9-]",
        suffix in "[a-z0-9]{0,8}",
    ) {
        let id = format!("{}{}{}", prefix, bad, suffix);
        prop_assert!(validate_id(&id).is_err());
    }
}
