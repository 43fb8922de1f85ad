/// Workflow engine driving multi-step exchanges with the radio.
///
/// A `State` sends its command on `enter` and reacts to replies in `accept`.
/// Each step reports a `StepResult`: hand over to another state right away,
/// wait for the next message, fail, or finish. `execute` runs a state on the
/// caller's thread until it waits, then lets the dispatcher thread feed it
/// messages until it finishes or fails.
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use log::debug;

use crate::dispatcher::{lock, Dispatch, Dispatcher, Listener};
use crate::error::AntError;
use crate::message::{AntMessage, Value};
use crate::Result;

pub mod command;

pub use command::{Command, Receive, Reply};

pub enum StepResult {
    /// Enter this state now.
    Continue(Box<dyn State>),
    /// Wait for the next message.
    AwaitEvent,
    Error(AntError),
    Done,
}

impl StepResult {
    fn describe(&self) -> String {
        match self {
            StepResult::Continue(state) => format!("continue to {}", state.name()),
            StepResult::AwaitEvent => "await event".into(),
            StepResult::Error(e) => format!("error: {}", e),
            StepResult::Done => "done".into(),
        }
    }
}

pub trait State: Send {
    fn name(&self) -> &str {
        "State"
    }

    /// Entry action. Must not block: anything that needs a reply returns
    /// `AwaitEvent`.
    fn enter(&mut self, _ctx: &mut Context) -> StepResult {
        StepResult::AwaitEvent
    }

    /// Reaction to a message read by the dispatcher. `AwaitEvent` leaves the
    /// message to the other listeners unless the state marked progress.
    fn accept(&mut self, _ctx: &mut Context, _event: &AntMessage) -> StepResult {
        StepResult::Done
    }
}

impl<S: State + ?Sized> State for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn enter(&mut self, ctx: &mut Context) -> StepResult {
        (**self).enter(ctx)
    }

    fn accept(&mut self, ctx: &mut Context, event: &AntMessage) -> StepResult {
        (**self).accept(ctx, event)
    }
}

/// What the states of one workflow share: the dispatcher to send with and
/// the replies collected so far.
pub struct Context {
    dispatcher: Dispatcher,
    pub replies: Vec<AntMessage>,
    progress: u64,
}

impl Context {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Context {
            dispatcher,
            replies: Vec::new(),
            progress: 0,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn send_named(&self, name: &str, args: &[Value]) -> Result<()> {
        self.dispatcher.send_named(name, args)
    }

    /// Latest collected reply with `msg_id`.
    pub fn last_reply(&self, msg_id: u8) -> Option<&AntMessage> {
        self.replies.iter().rev().find(|m| m.msg_id == msg_id)
    }

    /// Records that a message moved the workflow forward without a
    /// transition, which counts as activity for the idle timeout.
    pub fn mark_progress(&mut self) {
        self.progress += 1;
    }
}

/// States run one after the other. A state finishing with `Done` hands over
/// to the next one; `Continue` replaces the running state in place.
#[derive(Default)]
pub struct Chain {
    current: Option<Box<dyn State>>,
    pending: VecDeque<Box<dyn State>>,
}

pub fn chain(states: Vec<Box<dyn State>>) -> Chain {
    Chain {
        current: None,
        pending: states.into(),
    }
}

impl Chain {
    pub fn new() -> Self {
        Chain::default()
    }

    pub fn then<S: State + 'static>(mut self, state: S) -> Self {
        self.pending.push_back(Box::new(state));
        self
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.current.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drive(&mut self, ctx: &mut Context, mut result: StepResult) -> StepResult {
        loop {
            result = match result {
                StepResult::Continue(mut next) => {
                    ctx.mark_progress();
                    debug!("Chain continues to {}", next.name());
                    let result = next.enter(ctx);
                    self.current = Some(next);
                    result
                }
                StepResult::Done => match self.pending.pop_front() {
                    Some(mut next) => {
                        ctx.mark_progress();
                        debug!("Chain advances to {}", next.name());
                        let result = next.enter(ctx);
                        self.current = Some(next);
                        result
                    }
                    None => {
                        self.current = None;
                        return StepResult::Done;
                    }
                },
                other => return other,
            }
        }
    }
}

impl State for Chain {
    fn name(&self) -> &str {
        self.current.as_ref().map_or("Chain", |state| state.name())
    }

    fn enter(&mut self, ctx: &mut Context) -> StepResult {
        self.current = None;
        self.drive(ctx, StepResult::Done)
    }

    fn accept(&mut self, ctx: &mut Context, event: &AntMessage) -> StepResult {
        match self.current.as_mut() {
            Some(state) => {
                let result = state.accept(ctx, event);
                self.drive(ctx, result)
            }
            None => StepResult::Done,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Idle,
    Running,
    Final,
    Error,
}

/// Owns the running state and applies transitions until the state waits for
/// a message or the workflow terminates.
pub struct Workflow {
    state: Option<Box<dyn State>>,
    status: Status,
    error: Option<AntError>,
}

impl Workflow {
    pub fn new<S: State + 'static>(initial: S) -> Self {
        Workflow {
            state: Some(Box::new(initial)),
            status: Status::Idle,
            error: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, Status::Final | Status::Error)
    }

    pub fn error(&self) -> Option<&AntError> {
        self.error.as_ref()
    }

    /// Applies `result` and enters follow-up states until one awaits an
    /// event or the workflow terminates.
    pub fn transition(&mut self, ctx: &mut Context, mut result: StepResult) {
        loop {
            debug!(
                "Workflow {}: {}",
                self.state.as_ref().map_or("-", |state| state.name()),
                result.describe()
            );
            result = match result {
                StepResult::Continue(mut next) => {
                    ctx.mark_progress();
                    let result = next.enter(ctx);
                    self.state = Some(next);
                    result
                }
                StepResult::AwaitEvent => return,
                StepResult::Done => {
                    ctx.mark_progress();
                    self.state = None;
                    self.status = Status::Final;
                    return;
                }
                StepResult::Error(e) => {
                    self.state = None;
                    self.status = Status::Error;
                    self.error = Some(e);
                    return;
                }
            }
        }
    }

    fn outcome(&self) -> StepResult {
        match self.status {
            Status::Final => StepResult::Done,
            Status::Error => StepResult::Error(self.error.clone().unwrap_or(AntError::Timeout)),
            Status::Idle | Status::Running => StepResult::AwaitEvent,
        }
    }
}

/// A workflow nests like any other state.
impl State for Workflow {
    fn name(&self) -> &str {
        self.state.as_ref().map_or("Workflow", |state| state.name())
    }

    fn enter(&mut self, ctx: &mut Context) -> StepResult {
        let result = match self.state.as_mut() {
            Some(state) => state.enter(ctx),
            None => StepResult::Done,
        };
        self.status = Status::Running;
        self.transition(ctx, result);
        self.outcome()
    }

    fn accept(&mut self, ctx: &mut Context, event: &AntMessage) -> StepResult {
        if self.status != Status::Running {
            return self.outcome();
        }
        let result = match self.state.as_mut() {
            Some(state) => state.accept(ctx, event),
            None => StepResult::Done,
        };
        self.transition(ctx, result);
        self.outcome()
    }
}

struct Run {
    workflow: Workflow,
    context: Context,
}

struct WorkflowListener {
    run: Arc<Mutex<Run>>,
    progress: Sender<()>,
}

impl Listener for WorkflowListener {
    fn on_message(&self, _dispatcher: &Dispatcher, message: &AntMessage) -> Dispatch {
        let mut run = lock(&self.run);
        let Run { workflow, context } = &mut *run;
        if workflow.status() != Status::Running {
            return Dispatch::Ignored;
        }
        let before = context.progress;
        workflow.accept(context, message);
        if workflow.is_terminal() {
            let _ = self.progress.send(());
            Dispatch::Finished
        } else if context.progress != before {
            let _ = self.progress.send(());
            Dispatch::Consumed
        } else {
            Dispatch::Ignored
        }
    }
}

/// Runs `state` to completion. The initial `enter` runs on the calling
/// thread, replies are fed to the workflow by the dispatcher thread. Fails
/// with the recorded error if the workflow ends in error, or with `Timeout`
/// if it sees no progress for the dispatcher's reply timeout. Returns the
/// context holding the collected replies.
///
/// Must not be called from the dispatcher thread.
pub fn execute<S: State + 'static>(dispatcher: &Dispatcher, state: S) -> Result<Context> {
    if !dispatcher.is_running() {
        return Err(AntError::NotRunning);
    }
    let run = Arc::new(Mutex::new(Run {
        workflow: Workflow::new(state),
        context: Context::new(dispatcher.clone()),
    }));
    let (tx, rx) = unbounded();
    // Registered before the first command goes out so no reply is missed.
    let id = dispatcher.add_listener(Arc::new(WorkflowListener {
        run: run.clone(),
        progress: tx,
    }));
    {
        let mut run = lock(&run);
        let Run { workflow, context } = &mut *run;
        workflow.enter(context);
    }
    let timeout = dispatcher.config().get_reply_timeout();
    loop {
        if lock(&run).workflow.is_terminal() {
            break;
        }
        match rx.recv_timeout(timeout) {
            Ok(()) => continue,
            Err(RecvTimeoutError::Timeout) => {
                dispatcher.remove_listener(id);
                // A last message may have finished it.
                if lock(&run).workflow.is_terminal() {
                    break;
                }
                debug!("Workflow timed out after {:?}", timeout);
                return Err(AntError::Timeout);
            }
            Err(RecvTimeoutError::Disconnected) => {
                if lock(&run).workflow.is_terminal() {
                    break;
                }
                return Err(AntError::Disconnected);
            }
        }
    }
    dispatcher.remove_listener(id);
    let mut run = lock(&run);
    match run.workflow.status() {
        Status::Error => Err(run.workflow.error.take().unwrap_or(AntError::Timeout)),
        _ => Ok(mem::replace(
            &mut run.context,
            Context::new(dispatcher.clone()),
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dialect::{encode_reply, SerialDialect};
    use crate::dispatcher::Config;
    use crate::message::*;
    use crate::transport::mock::MockTransport;
    use std::time::Duration;

    /// Records enter/accept calls and replays a script of results.
    struct Scripted {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        on_enter: Option<StepResult>,
        on_accept: Vec<StepResult>,
    }

    impl Scripted {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Scripted {
                name,
                log: log.clone(),
                on_enter: None,
                on_accept: Vec::new(),
            }
        }

        fn entering(mut self, result: StepResult) -> Self {
            self.on_enter = Some(result);
            self
        }

        fn accepting(mut self, result: StepResult) -> Self {
            self.on_accept.push(result);
            self
        }
    }

    impl State for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn enter(&mut self, _ctx: &mut Context) -> StepResult {
            self.log.lock().unwrap().push(format!("enter {}", self.name));
            self.on_enter.take().unwrap_or(StepResult::AwaitEvent)
        }

        fn accept(&mut self, _ctx: &mut Context, _event: &AntMessage) -> StepResult {
            self.log.lock().unwrap().push(format!("accept {}", self.name));
            if self.on_accept.is_empty() {
                StepResult::Done
            } else {
                self.on_accept.remove(0)
            }
        }
    }

    fn context() -> Context {
        Context::new(Dispatcher::new(MockTransport::new()))
    }

    fn event() -> AntMessage {
        let frame = encode_reply("StartupMessage", &[0u8.into()]).unwrap();
        SerialDialect::new().decode(&frame).unwrap()
    }

    fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn chain_runs_states_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context();
        let mut workflow = Workflow::new(
            Chain::new()
                .then(Scripted::new("a", &log).entering(StepResult::Done))
                .then(Scripted::new("b", &log))
                .then(Scripted::new("c", &log)),
        );
        assert!(matches!(workflow.enter(&mut ctx), StepResult::AwaitEvent));
        assert_eq!(workflow.name(), "b");
        assert!(matches!(
            workflow.accept(&mut ctx, &event()),
            StepResult::AwaitEvent
        ));
        assert!(matches!(
            workflow.accept(&mut ctx, &event()),
            StepResult::Done
        ));
        assert_eq!(workflow.status(), Status::Final);
        assert_eq!(
            entries(&log),
            vec!["enter a", "enter b", "accept b", "enter c", "accept c"]
        );
    }

    #[test]
    fn continue_enters_immediately() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context();
        let second = Scripted::new("second", &log).entering(StepResult::Done);
        let first = Scripted::new("first", &log)
            .entering(StepResult::Continue(Box::new(second)));
        let mut workflow = Workflow::new(first);
        assert!(matches!(workflow.enter(&mut ctx), StepResult::Done));
        assert_eq!(entries(&log), vec!["enter first", "enter second"]);
    }

    #[test]
    fn continue_inside_chain_resumes_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context();
        let detour = Scripted::new("detour", &log);
        let mut workflow = Workflow::new(chain(vec![
            Box::new(Scripted::new("a", &log).entering(StepResult::Continue(Box::new(detour)))),
            Box::new(Scripted::new("b", &log).entering(StepResult::Done)),
        ]));
        workflow.enter(&mut ctx);
        workflow.accept(&mut ctx, &event());
        assert_eq!(workflow.status(), Status::Final);
        assert_eq!(
            entries(&log),
            vec!["enter a", "enter detour", "accept detour", "enter b"]
        );
    }

    #[test]
    fn error_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context();
        let mut workflow = Workflow::new(
            Chain::new()
                .then(Scripted::new("a", &log).accepting(StepResult::Error(AntError::Timeout)))
                .then(Scripted::new("b", &log)),
        );
        workflow.enter(&mut ctx);
        assert!(matches!(
            workflow.accept(&mut ctx, &event()),
            StepResult::Error(AntError::Timeout)
        ));
        assert_eq!(workflow.status(), Status::Error);
        assert_eq!(workflow.error(), Some(&AntError::Timeout));
        // Terminal workflows ignore further events.
        workflow.accept(&mut ctx, &event());
        assert_eq!(entries(&log), vec!["enter a", "accept a"]);
    }

    #[test]
    fn default_state_finishes_on_first_event() {
        struct Waiting;
        impl State for Waiting {}
        let mut ctx = context();
        let mut workflow = Workflow::new(Waiting);
        assert!(matches!(workflow.enter(&mut ctx), StepResult::AwaitEvent));
        assert!(matches!(
            workflow.accept(&mut ctx, &event()),
            StepResult::Done
        ));
    }

    #[test]
    fn execute_collects_replies() {
        let transport = Arc::new(
            MockTransport::new()
                .on(
                    MESG_SYSTEM_RESET_ID,
                    vec![encode_reply("StartupMessage", &[0x20u8.into()]).unwrap()],
                )
                .on(
                    MESG_REQUEST_ID,
                    vec![b"\xA4\x06\x54\x08\x03\xFF\xAA\xBB\x00\x13".to_vec()],
                ),
        );
        let dispatcher = Dispatcher::new(transport.clone());
        dispatcher.start().unwrap();
        let ctx = execute(
            &dispatcher,
            Chain::new()
                .then(Command::reset_system())
                .then(Command::get_capabilities()),
        )
        .unwrap();
        assert_eq!(transport.written_ids(), vec![MESG_SYSTEM_RESET_ID, MESG_REQUEST_ID]);
        assert!(ctx.last_reply(MESG_STARTUP_MESG_ID).is_some());
        let capabilities = ctx.last_reply(MESG_CAPABILITIES_ID).unwrap();
        assert_eq!(capabilities.args.u8("max_channels"), Ok(8));
        assert_eq!(dispatcher.listener_count(), 0);
        dispatcher.stop().unwrap();
    }

    #[test]
    fn execute_surfaces_failure() {
        let transport = Arc::new(MockTransport::new().on(
            MESG_OPEN_CHANNEL_ID,
            vec![encode_reply(
                "ChannelResponse",
                &[0u8.into(), MESG_OPEN_CHANNEL_ID.into(), CHANNEL_IN_WRONG_STATE.into()],
            )
            .unwrap()],
        ));
        let dispatcher = Dispatcher::new(transport.clone());
        dispatcher.start().unwrap();
        assert_eq!(
            execute(&dispatcher, Command::open_channel(0)).err(),
            Some(AntError::MessageFailed {
                msg_id: MESG_OPEN_CHANNEL_ID,
                code: CHANNEL_IN_WRONG_STATE
            })
        );
        assert_eq!(dispatcher.listener_count(), 0);
        dispatcher.stop().unwrap();
    }

    #[test]
    fn execute_times_out_without_replies() {
        let dispatcher = Dispatcher::with_config(
            MockTransport::new(),
            SerialDialect::new(),
            Config::new().reply_timeout(Duration::from_millis(30)),
        );
        dispatcher.start().unwrap();
        assert_eq!(
            execute(&dispatcher, Command::open_channel(0)).err(),
            Some(AntError::Timeout)
        );
        assert_eq!(dispatcher.listener_count(), 0);
        dispatcher.stop().unwrap();
    }

    #[test]
    fn execute_requires_running_dispatcher() {
        let dispatcher = Dispatcher::new(MockTransport::new());
        assert_eq!(
            execute(&dispatcher, Command::reset_system()).err(),
            Some(AntError::NotRunning)
        );
    }
}
