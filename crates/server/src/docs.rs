//! Documentation accessors
//!
//! Constant help text behind the `get_*_guide` tools.

pub const TESTING_GUIDE: &str = r#"VoiceCI test suites

A run executes audio tests and/or conversation tests against one agent.

Audio tests (pass their names in audio_tests):
  echo                  - detects agents that answer their own TTS
  ttfb                  - p95 response latency over simple/complex/tool prompts
  barge_in              - how fast the agent yields when interrupted
  silence_handling      - survives 8s of caller silence
  connection_stability  - five turns without a drop
  response_completeness - answers are long enough and finish their sentence
  noise_resilience      - white/babble/pink noise at 20/10/5 dB SNR
  endpointing           - tolerates a mid-sentence pause without jumping in
  audio_quality         - clipping, energy consistency, minimum speech

Conversation tests take a caller persona prompt, max_turns (1-50), optional
initial_silence_threshold_ms, and two lists of yes/no questions:
behavioral_evals judged on the transcript, tool_call_evals judged on the
tool calls the agent surfaced.

Thresholds are overridable per run with a nested map, e.g.
  {"ttfb": {"p95_threshold_ms": 1500}, "noise_resilience": {"min_pass_snr_db": 5}}

Results stream to this session as each test completes; get_status returns
the full result set once the run is terminal."#;

pub const ADAPTER_GUIDE: &str = r#"VoiceCI adapters

configure_adapter stores how to reach your agent and returns an
adapter_config_id to pass to run_suite.

  ws-voice   - {"adapter": "ws-voice", "agent_url": "ws://host:port/path"}
               binary frames are 24 kHz mono PCM; text frames are JSON events.
  sip        - {"adapter": "sip", "target_number": "+1555..."} dials out;
               {"adapter": "sip", "inbound": true} waits for your agent to
               call the rented number.
  webrtc     - {"adapter": "webrtc", "room": "my-room"} joins the LiveKit
               room with a server-minted token.
  vapi       - {"adapter": "vapi", "assistant_id": "..."}
  retell     - {"adapter": "retell", "agent_number": "+1555..."}
  elevenlabs - {"adapter": "elevenlabs", "agent_id": "..."}
  bland      - {"adapter": "bland", "agent_number": "+1555..."}

Hosted platforms need the matching server-side API key; sip, retell, and
bland additionally need the telephony carrier configured. Agents that
cannot reach the audio socket may POST tool-call events to the listener's
/tool-calls endpoint (see tool_call_endpoint_url)."#;
