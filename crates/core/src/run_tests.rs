// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn new_run_is_not_terminal() {
    let run = JobRun::new(RunId::new(), JobId::from_string("j1"), "e1", "e1-n1", 0, 100);
    assert!(!run.in_terminal_state());
    assert!(!run.run_attempted);
}

#[yare::parameterized(
    succeeded = { JobRun::builder().succeeded(true).build(), true },
    failed    = { JobRun::builder().failed(true).build(), true },
    cancelled = { JobRun::builder().cancelled(true).build(), true },
    running   = { JobRun::builder().running(true).build(), false },
    pending   = { JobRun::builder().pending(true).build(), false },
    returned  = { JobRun::builder().returned(true).build(), false },
)]
fn terminal_iff_terminal_flag(run: JobRun, expected: bool) {
    assert_eq!(run.in_terminal_state(), expected);
}

#[test]
fn with_running_marks_attempted() {
    let run = JobRun::builder().pending(true).build().with_running();
    assert!(run.running);
    assert!(run.run_attempted);
    assert!(!run.pending);
}

#[test]
fn with_preempted_is_a_failure() {
    let run = JobRun::builder().running(true).run_attempted(true).build().with_preempted();
    assert!(run.preempted);
    assert!(run.failed);
    assert!(!run.running);
    assert!(run.in_terminal_state());
}

#[test]
fn derivation_does_not_mutate_original() {
    let run = JobRun::builder().build();
    let _ = run.with_failed();
    assert!(!run.failed);
}
