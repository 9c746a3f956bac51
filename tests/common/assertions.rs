//! Custom assertion macros and utilities

use xfsync::shared::{CmdItem, OpPush, TransData};

/// Assert that a result is ok and return the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a reply envelope is an error with the given code
#[macro_export]
macro_rules! assert_reply_err {
    ($reply:expr, $code:expr) => {
        let reply = &$reply;
        assert!(reply.is_error(), "Expected an error reply, got {:?}", reply);
        assert_eq!(reply.code, Some($code), "unexpected code in {:?}", reply);
    };
}

/// Assert that a string contains a substring
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        assert!(
            $haystack.contains($needle),
            "Expected '{}' to contain '{}'",
            $haystack,
            $needle
        );
    };
}

/// Assert a successful reply and return it
pub fn ok_reply(reply: TransData) -> TransData {
    assert!(!reply.is_error(), "Expected a successful reply, got {:?}", reply);
    reply
}

/// Items carried by an `op` push or pull reply
pub fn op_items(envelope: &TransData) -> Vec<CmdItem> {
    let push: OpPush = envelope.payload().expect("op payload");
    push.items().expect("cmds_data decodes")
}

pub fn ver_ids(items: &[CmdItem]) -> Vec<u64> {
    items.iter().map(|item| item.ver_id).collect()
}

pub fn cmd_ids(items: &[CmdItem]) -> Vec<String> {
    items.iter().map(|item| item.cmd.id.clone()).collect()
}
