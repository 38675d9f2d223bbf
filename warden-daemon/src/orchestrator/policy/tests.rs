use super::*;

fn input(exit: ExitKind, has_cron: bool, master_exited: bool) -> PolicyInput {
    PolicyInput {
        exit,
        has_cron,
        policy: RestartPolicy::OnFailures,
        master_exited,
        stopping: false,
        restart_requested: false,
    }
}

#[test]
fn default_policy_table() {
    use Decision::*;
    use ExitKind::*;

    // (exit, cron, master exited) -> decision
    let table = [
        (StoppedOrKilled, false, false, Finish),
        (StoppedOrKilled, false, true, Finish),
        (StoppedOrKilled, true, false, Finish),
        (StoppedOrKilled, true, true, Finish),
        (Unrecoverable, false, false, Finish),
        (Unrecoverable, false, true, Finish),
        (Unrecoverable, true, false, RestartDelayed),
        (Unrecoverable, true, true, Finish),
        (Success, false, false, Finish),
        (Success, false, true, Finish),
        (Success, true, false, RestartDelayed),
        (Success, true, true, Finish),
        (Failure, false, false, RestartDelayed),
        (Failure, false, true, RestartDelayed),
        (Failure, true, false, RestartDelayed),
        (Failure, true, true, RestartDelayed),
    ];

    for (exit, cron, master, expected) in table {
        assert_eq!(
            decide(&input(exit, cron, master)),
            expected,
            "exit={:?} cron={} master_exited={}",
            exit,
            cron,
            master
        );
    }
}

#[test]
fn stopping_always_finishes() {
    for exit in [
        ExitKind::Success,
        ExitKind::Failure,
        ExitKind::StoppedOrKilled,
        ExitKind::Unrecoverable,
    ] {
        let mut i = input(exit, true, false);
        i.stopping = true;
        i.restart_requested = true;
        i.policy = RestartPolicy::Always;
        assert_eq!(decide(&i), Decision::Finish);
    }
}

#[test]
fn restart_request_wins_over_stop() {
    let mut i = input(ExitKind::StoppedOrKilled, false, false);
    i.restart_requested = true;
    assert_eq!(decide(&i), Decision::RestartNow);

    i.policy = RestartPolicy::Never;
    assert_eq!(decide(&i), Decision::RestartNow);
}

#[test]
fn restart_request_ignored_after_master_exit() {
    let mut i = input(ExitKind::StoppedOrKilled, false, true);
    i.restart_requested = true;
    assert_eq!(decide(&i), Decision::Finish);
}

#[test]
fn never_policy_does_not_restart_failures() {
    let mut i = input(ExitKind::Failure, false, false);
    i.policy = RestartPolicy::Never;
    assert_eq!(decide(&i), Decision::Finish);

    // cron keeps scheduled services alive regardless
    i.exit = ExitKind::Success;
    i.has_cron = true;
    assert_eq!(decide(&i), Decision::RestartDelayed);
}

#[test]
fn always_policy_restarts_success_until_master_exits() {
    let mut i = input(ExitKind::Success, false, false);
    i.policy = RestartPolicy::Always;
    assert_eq!(decide(&i), Decision::RestartDelayed);

    i.master_exited = true;
    assert_eq!(decide(&i), Decision::Finish);
}

#[test]
fn exit_kind_classifies_results() {
    assert_eq!(ExitKind::of(&Ok(())), ExitKind::Success);
    assert_eq!(
        ExitKind::of(&Err(ExecutionError::UnexpectedExit { service: "a".into(), code: 1 })),
        ExitKind::Failure
    );
    assert_eq!(
        ExitKind::of(&Err(ExecutionError::StoppedOrKilled { service: "a".into(), code: None })),
        ExitKind::StoppedOrKilled
    );
    assert_eq!(
        ExitKind::of(&Err(ExecutionError::Unrecoverable {
            service: "a".into(),
            message: "boom".into()
        })),
        ExitKind::Unrecoverable
    );
}
