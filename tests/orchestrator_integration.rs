//! End-to-end orchestrator tests over the in-process hub
//!
//! A scripted agent plays back pre-built turns while a probe endpoint
//! subscribed to `outbox:*` observes everything the orchestrator emits.

use agent_relay::{
    AgentRunner, AgentTurn, CancellationManager, EventParser, MemoryChannel, MemoryHub,
    MessageChannel, MessageStream, MessagingService, ModelEvent, ModelMessage, Orchestrator,
    RelayError, Result, Role, StreamProcessor, TurnNode, TurnResult, VisualizationJudge,
    VisualizationRetryManager, RETRY_PROMPT,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

// ─── Scripted agent ──────────────────────────────────────────────────────────

/// One playback step of a scripted turn
enum ScriptNode {
    Model(Vec<ModelEvent>),
    Tools(Vec<ModelEvent>),
    /// Model node backed by a live receiver; the test feeds and closes it
    LiveModel(mpsc::UnboundedReceiver<ModelEvent>),
    End(TurnResult),
}

impl ScriptNode {
    fn into_node(self) -> TurnNode {
        match self {
            ScriptNode::Model(events) => {
                TurnNode::ModelRequest(futures::stream::iter(events.into_iter().map(Ok)).boxed())
            }
            ScriptNode::Tools(events) => {
                TurnNode::ToolCalls(futures::stream::iter(events.into_iter().map(Ok)).boxed())
            }
            ScriptNode::LiveModel(rx) => TurnNode::ModelRequest(
                tokio_stream::wrappers::UnboundedReceiverStream::new(rx)
                    .map(Ok)
                    .boxed(),
            ),
            ScriptNode::End(result) => TurnNode::End(result),
        }
    }
}

/// Agent that replays a queue of scripted turns and records the prompts
/// and history it was started with
struct ScriptedAgent {
    turns: Mutex<VecDeque<Vec<ScriptNode>>>,
    prompts: Mutex<Vec<String>>,
    history_lens: Mutex<Vec<usize>>,
}

impl ScriptedAgent {
    fn new(turns: Vec<Vec<ScriptNode>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            prompts: Mutex::new(Vec::new()),
            history_lens: Mutex::new(Vec::new()),
        }
    }

    fn turns_started(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn prompt(&self, i: usize) -> String {
        self.prompts.lock().unwrap()[i].clone()
    }
}

struct ScriptedTurn {
    nodes: VecDeque<ScriptNode>,
}

#[async_trait]
impl AgentRunner for ScriptedAgent {
    async fn start_turn(
        &self,
        prompt: &str,
        history: Vec<ModelMessage>,
    ) -> Result<Box<dyn AgentTurn>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.history_lens.lock().unwrap().push(history.len());
        let nodes = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RelayError::Turn("script exhausted".into()))?;
        Ok(Box::new(ScriptedTurn {
            nodes: nodes.into(),
        }))
    }
}

#[async_trait]
impl AgentTurn for ScriptedTurn {
    async fn next_node(&mut self) -> Result<TurnNode> {
        self.nodes
            .pop_front()
            .map(ScriptNode::into_node)
            .ok_or_else(|| RelayError::Turn("turn script exhausted".into()))
    }
}

// ─── Judges ──────────────────────────────────────────────────────────────────

/// Judge with a fixed queue of verdicts, counting its invocations
struct ScriptedJudge {
    verdicts: Mutex<VecDeque<bool>>,
    calls: AtomicUsize,
}

impl ScriptedJudge {
    fn new(verdicts: Vec<bool>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VisualizationJudge for ScriptedJudge {
    async fn needs_visualization(&self, _transcript: &[ModelMessage]) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdicts.lock().unwrap().pop_front().unwrap_or(false))
    }
}

struct FailingJudge;

#[async_trait]
impl VisualizationJudge for FailingJudge {
    async fn needs_visualization(&self, _transcript: &[ModelMessage]) -> Result<bool> {
        Err(RelayError::Judge("judge unavailable".into()))
    }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
    agent: Arc<ScriptedAgent>,
    publisher: MemoryChannel,
    outbox: Box<dyn MessageStream>,
}

async fn spawn_orchestrator(
    agent: ScriptedAgent,
    judge: Arc<dyn VisualizationJudge>,
    max_retries: u32,
) -> Harness {
    let hub = MemoryHub::new();
    let agent = Arc::new(agent);

    let messaging = Arc::new(MessagingService::new(Arc::new(hub.channel())));
    let cancellation = Arc::new(CancellationManager::new(
        Arc::new(hub.channel()),
        messaging.clone(),
    ));
    let retry = Arc::new(VisualizationRetryManager::new(
        messaging.clone(),
        judge,
        max_retries,
    ));
    let processor = Arc::new(StreamProcessor::new(
        messaging.clone(),
        EventParser,
        retry.clone(),
    ));
    let orchestrator = Orchestrator::new(messaging, cancellation, processor, retry, agent.clone());

    // The probe subscribes before the orchestrator can emit anything
    let probe = hub.channel();
    probe.connect().await.unwrap();
    probe.subscribe("outbox:*").await.unwrap();
    let outbox = probe.listen().await.unwrap();

    tokio::spawn(async move {
        let _ = orchestrator.serve().await;
    });
    // Let serve() register its inbox/cancel subscriptions
    sleep(Duration::from_millis(50)).await;

    let publisher = hub.channel();
    publisher.connect().await.unwrap();

    Harness {
        agent,
        publisher,
        outbox,
    }
}

impl Harness {
    async fn send_request(&self, email: &str, message: &str) {
        self.publisher
            .publish(
                &format!("inbox:{email}"),
                &serde_json::json!({ "email": email, "message": message }),
            )
            .await
            .unwrap();
    }

    async fn send_cancel(&self, email: &str) {
        self.publisher
            .publish(&format!("cancel:{email}"), &serde_json::json!({}))
            .await
            .unwrap();
    }

    /// Collect outbound events through the first terminal one
    async fn collect_until_terminal(&mut self) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        loop {
            let msg = timeout(Duration::from_secs(2), self.outbox.next())
                .await
                .expect("timed out waiting for an outbound event")
                .unwrap()
                .expect("outbox stream ended unexpectedly");
            let done = msg.data["done"] == true;
            events.push(msg.data);
            if done {
                return events;
            }
        }
    }

    /// Assert that nothing further arrives on the outbox
    async fn assert_outbox_quiet(&mut self) {
        let extra = timeout(Duration::from_millis(200), self.outbox.next()).await;
        assert!(extra.is_err(), "unexpected event after terminal: {extra:?}");
    }
}

fn kinds(events: &[serde_json::Value]) -> Vec<String> {
    events
        .iter()
        .map(|e| e["event"].as_str().unwrap_or("?").to_string())
        .collect()
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tool_answer_with_table_finalizes_without_judge() {
    let agent = ScriptedAgent::new(vec![vec![
        ScriptNode::Tools(vec![
            ModelEvent::ToolCallStart {
                name: "query_data".into(),
                args: serde_json::json!({"sql": "select month, total from sales"}),
            },
            ModelEvent::ToolCallResult {
                tool_call_id: "tc-1".into(),
                content: r#"TABLE_JSON:{"columns":["month","total"],"rows":[["Jan",10]]}"#.into(),
            },
        ]),
        ScriptNode::End(TurnResult {
            output: Some("Sales rise steadily through Q4.".into()),
            messages: vec![ModelMessage::new(Role::Assistant, "Sales rise steadily")],
        }),
    ]]);
    let judge = Arc::new(ScriptedJudge::new(vec![true]));
    let mut h = spawn_orchestrator(agent, judge.clone(), 2).await;

    h.send_request("a@x.com", "show me sales by month").await;
    let events = h.collect_until_terminal().await;

    assert_eq!(
        kinds(&events),
        vec!["tool_call_start", "data_table", "text", "done"]
    );
    assert_eq!(events[1]["json"]["columns"][0], "month");
    assert_eq!(events[2]["content"], "Sales rise steadily through Q4.");
    assert_eq!(events[3]["done"], true);

    // The visual fast path never consults the judge
    assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.agent.turns_started(), 1);
    h.assert_outbox_quiet().await;
}

#[tokio::test]
async fn test_retry_exhaustion_publishes_apology() {
    let text_turn = |answer: &str| {
        vec![
            ScriptNode::Model(vec![ModelEvent::Text {
                delta: answer.to_string(),
            }]),
            ScriptNode::End(TurnResult {
                output: Some(answer.to_string()),
                messages: vec![ModelMessage::new(Role::Assistant, answer)],
            }),
        ]
    };
    let agent = ScriptedAgent::new(vec![
        text_turn("prose only"),
        text_turn("still prose"),
        text_turn("yet more prose"),
    ]);
    let judge = Arc::new(ScriptedJudge::new(vec![true, true, true]));
    let mut h = spawn_orchestrator(agent, judge.clone(), 2).await;

    h.send_request("a@x.com", "chart the revenue").await;
    let events = h.collect_until_terminal().await;

    let ks = kinds(&events);
    assert_eq!(
        ks.iter().filter(|k| k.as_str() == "retrying").count(),
        2,
        "one retrying event per retry: {ks:?}"
    );
    let last = events.last().unwrap();
    assert_eq!(last["event"], "error");
    assert_eq!(last["done"], true);
    assert!(last["message"]
        .as_str()
        .unwrap()
        .contains("could not be generated"));

    // max_retries = 2 bounds the request to 3 turns, and the ceiling
    // check fires before the judge would run a third time
    assert_eq!(h.agent.turns_started(), 3);
    assert_eq!(judge.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.agent.prompt(1), RETRY_PROMPT);
    assert_eq!(h.agent.prompt(2), RETRY_PROMPT);
    h.assert_outbox_quiet().await;
}

#[tokio::test]
async fn test_retry_then_success_on_second_turn() {
    let agent = ScriptedAgent::new(vec![
        vec![
            ScriptNode::Model(vec![ModelEvent::Text {
                delta: "here are the numbers".into(),
            }]),
            ScriptNode::End(TurnResult {
                output: Some("here are the numbers".into()),
                messages: vec![ModelMessage::new(Role::Assistant, "here are the numbers")],
            }),
        ],
        vec![
            ScriptNode::Tools(vec![ModelEvent::ToolCallResult {
                tool_call_id: "tc-2".into(),
                content: r#"PLOTLY_JSON:{"data":[],"layout":{}}"#.into(),
            }]),
            ScriptNode::End(TurnResult {
                output: Some("Here is the chart.".into()),
                messages: vec![ModelMessage::new(Role::Assistant, "Here is the chart.")],
            }),
        ],
    ]);
    let judge = Arc::new(ScriptedJudge::new(vec![true]));
    let mut h = spawn_orchestrator(agent, judge.clone(), 2).await;

    h.send_request("a@x.com", "plot the revenue").await;
    let events = h.collect_until_terminal().await;

    let ks = kinds(&events);
    assert_eq!(
        ks,
        vec!["thinking", "retrying", "plotly", "text", "done"],
        "turn two reaches the fast path: {ks:?}"
    );
    // Fast path on the second turn: the judge ran exactly once
    assert_eq!(judge.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.agent.turns_started(), 2);
    h.assert_outbox_quiet().await;
}

#[tokio::test]
async fn test_judge_failure_defaults_to_retry() {
    let agent = ScriptedAgent::new(vec![
        vec![ScriptNode::End(TurnResult {
            output: Some("prose".into()),
            messages: vec![ModelMessage::new(Role::Assistant, "prose")],
        })],
        vec![
            ScriptNode::Tools(vec![ModelEvent::ToolCallResult {
                tool_call_id: "tc-1".into(),
                content: r#"PLOTLY_JSON:{"data":[]}"#.into(),
            }]),
            ScriptNode::End(TurnResult {
                output: Some("chart attached".into()),
                messages: vec![],
            }),
        ],
    ]);
    let mut h = spawn_orchestrator(agent, Arc::new(FailingJudge), 2).await;

    h.send_request("a@x.com", "chart it").await;
    let events = h.collect_until_terminal().await;

    let ks = kinds(&events);
    assert_eq!(ks, vec!["retrying", "plotly", "text", "done"]);
    assert_eq!(h.agent.turns_started(), 2);
}

#[tokio::test]
async fn test_mid_stream_cancel_stops_at_node_boundary() {
    let (tx, rx) = mpsc::unbounded_channel();
    let agent = ScriptedAgent::new(vec![vec![
        ScriptNode::LiveModel(rx),
        // Never reached: the cancel lands before the next node is requested
        ScriptNode::Model(vec![ModelEvent::Text {
            delta: "should not stream".into(),
        }]),
        ScriptNode::End(TurnResult::default()),
    ]]);
    let judge = Arc::new(ScriptedJudge::new(vec![false]));
    let mut h = spawn_orchestrator(agent, judge, 2).await;

    h.send_request("a@x.com", "long running question").await;

    // Feed one delta and wait for it to surface on the probe
    tx.send(ModelEvent::Thinking {
        delta: "working on it".into(),
    })
    .unwrap();
    let first = timeout(Duration::from_secs(2), h.outbox.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.data["event"], "thinking");

    // Cancel while the model node is still open, then end the node
    h.send_cancel("a@x.com").await;
    sleep(Duration::from_millis(100)).await;
    drop(tx);

    let msg = timeout(Duration::from_secs(2), h.outbox.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(msg.data["event"], "done");
    assert_eq!(msg.data["done"], true);

    // Nothing from the scripted nodes after the cancel point
    h.assert_outbox_quiet().await;
    assert_eq!(h.agent.turns_started(), 1);
}

#[tokio::test]
async fn test_cancel_before_first_node_short_circuits() {
    let agent = ScriptedAgent::new(vec![vec![
        ScriptNode::Model(vec![ModelEvent::Thinking {
            delta: "never streamed".into(),
        }]),
        ScriptNode::End(TurnResult::default()),
    ]]);
    let judge = Arc::new(ScriptedJudge::new(vec![false]));
    let mut h = spawn_orchestrator(agent, judge, 2).await;

    h.send_cancel("a@x.com").await;
    sleep(Duration::from_millis(100)).await;
    h.send_request("a@x.com", "anything").await;

    let events = h.collect_until_terminal().await;
    assert_eq!(kinds(&events), vec!["done"]);
    h.assert_outbox_quiet().await;
}

#[tokio::test]
async fn test_malformed_inbound_message_is_dropped() {
    let agent = ScriptedAgent::new(vec![]);
    let judge = Arc::new(ScriptedJudge::new(vec![]));
    let mut h = spawn_orchestrator(agent, judge, 2).await;

    h.publisher
        .publish("inbox:a@x.com", &serde_json::json!({ "email": "a@x.com" }))
        .await
        .unwrap();
    h.publisher
        .publish(
            "inbox:a@x.com",
            &serde_json::json!({ "email": "", "message": "hi" }),
        )
        .await
        .unwrap();

    h.assert_outbox_quiet().await;
    assert_eq!(h.agent.turns_started(), 0);
}

#[tokio::test]
async fn test_turn_failure_publishes_terminal_error() {
    // An empty script makes start_turn fail immediately
    let agent = ScriptedAgent::new(vec![]);
    let judge = Arc::new(ScriptedJudge::new(vec![]));
    let mut h = spawn_orchestrator(agent, judge, 2).await;

    h.send_request("a@x.com", "hello").await;
    let events = h.collect_until_terminal().await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"], "error");
    assert_eq!(events[0]["done"], true);
    h.assert_outbox_quiet().await;
}

#[tokio::test]
async fn test_retry_turn_receives_previous_history() {
    let agent = ScriptedAgent::new(vec![
        vec![ScriptNode::End(TurnResult {
            output: Some("prose".into()),
            messages: vec![
                ModelMessage::new(Role::User, "chart it"),
                ModelMessage::new(Role::Assistant, "prose"),
            ],
        })],
        vec![
            ScriptNode::Tools(vec![ModelEvent::ToolCallResult {
                tool_call_id: "tc-1".into(),
                content: r#"PLOTLY_JSON:{"data":[]}"#.into(),
            }]),
            ScriptNode::End(TurnResult {
                output: Some("done".into()),
                messages: vec![],
            }),
        ],
    ]);
    let judge = Arc::new(ScriptedJudge::new(vec![true]));
    let mut h = spawn_orchestrator(agent, judge, 2).await;

    h.send_request("a@x.com", "chart it").await;
    let _ = h.collect_until_terminal().await;

    let lens = h.agent.history_lens.lock().unwrap().clone();
    assert_eq!(lens, vec![0, 2], "retry turn carries the prior transcript");
}
