mod spawn;

use std::io::Read;

use crate::{ExitStatus, Popen, PopenConfig, PopenError, Redirection};

pub fn read_whole_file<T: Read>(mut f: T) -> String {
    let mut content = String::new();
    f.read_to_string(&mut content).unwrap();
    content
}

fn assert_send<T: Send>() {}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn public_types_are_thread_safe() {
    assert_send_sync::<Popen>();
    assert_send::<PopenConfig>();
    assert_send_sync::<ExitStatus>();
    assert_send_sync::<Redirection>();
    assert_send_sync::<PopenError>();
}
