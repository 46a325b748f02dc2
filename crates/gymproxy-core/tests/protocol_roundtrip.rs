use gymproxy_core::{
    Fields, Map, RenderParams, Request, RpcRequest, SessionId, SessionParams, SetupParams,
    StepParams, StepResult, Tensor, Value,
};

#[test]
fn typed_requests_survive_envelope_conversion() {
    let session_id = SessionId::from("abc123");
    let mut setup = SetupParams::new("Toy-v0");
    setup.extra.insert("seed".to_string(), Value::Int(7));

    let requests = vec![
        Request::Setup(setup),
        Request::Step(StepParams {
            session_id: session_id.clone(),
            action: Value::Int(0),
        }),
        Request::Reset(SessionParams {
            session_id: session_id.clone(),
        }),
        Request::Render(RenderParams {
            session_id: session_id.clone(),
            mode: "rgb_array".to_string(),
            close: false,
        }),
        Request::Close(SessionParams { session_id }),
    ];

    for request in requests {
        let rpc = request.clone().into_rpc();
        assert_eq!(rpc.method, request.method().as_str());
        let decoded = Request::try_from(rpc).expect("request should convert back");
        assert_eq!(decoded, request);
    }
}

#[test]
fn setup_extra_keys_pass_through() {
    let rpc = RpcRequest::new(
        "setup",
        Map::from([
            ("env_name".to_string(), Value::from("Toy-v0")),
            ("frame_skip".to_string(), Value::Int(4)),
        ]),
    );

    let Request::Setup(params) = Request::try_from(rpc).expect("setup should parse") else {
        panic!("expected setup");
    };
    assert_eq!(params.env_name, "Toy-v0");
    assert_eq!(params.extra.get("frame_skip"), Some(&Value::Int(4)));
}

#[test]
fn step_result_carries_tensor_observation() {
    let obs = Tensor::from_slice(vec![2], &[0.5_f32, 1.0]).expect("tensor");
    let result = StepResult {
        obs: Value::Tensor(obs),
        reward: 1.0,
        done: false,
        info: Map::new(),
        session_id: SessionId::from("abc123"),
    };

    let decoded = StepResult::from_map(result.clone().into_map()).expect("step result parses");
    assert_eq!(decoded, result);
}

#[test]
fn step_result_accepts_integer_reward_and_missing_info() {
    let map = Map::from([
        ("obs".to_string(), Value::List(vec![Value::Int(1)])),
        ("reward".to_string(), Value::Int(2)),
        ("done".to_string(), Value::Bool(true)),
        ("session_id".to_string(), Value::from("s")),
    ]);

    let result = StepResult::from_map(map).expect("step result parses");
    assert_eq!(result.reward, 2.0);
    assert!(result.done);
    assert!(result.info.is_empty());
}

#[test]
fn session_id_serializes_transparently() {
    let json = serde_json::to_string(&SessionId::from("abc123")).expect("serialize");
    assert_eq!(json, "\"abc123\"");
}
