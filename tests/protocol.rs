use std::collections::HashMap;

use smpc_sim::{
    Context, Error, EventLog, Protocol, Role, Session, json,
    protocols::{SecureSum, SumRole},
    roles,
    visualiser::Event,
};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

fn init_tracing() -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .set_default()
}

roles! {
    enum Pair {
        Alice => "alice",
        Bob => "bob",
    }
}

roles! {
    enum Trio {
        Alice => "alice",
        Bob => "bob",
        Carol => "carol",
    }
}

/// Alice doubles `a` and sends it to Bob as `b`.
struct Double;

impl Protocol for Double {
    type Role = Pair;

    fn name(&self) -> &str {
        "Double"
    }

    fn input_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
        HashMap::from([(Pair::Alice, vec!["a"])])
    }

    fn output_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
        HashMap::from([(Pair::Bob, vec!["b"])])
    }

    fn run(&mut self, ctx: &mut Context<Pair>) -> Result<(), Error> {
        ctx.compute(
            Pair::Alice,
            &["b"],
            |p| Ok(vec![json!(2 * p.get_variable("a")?.as_i64().unwrap_or_default())]),
            "double a",
        )?;
        ctx.send_variables(Pair::Alice, Pair::Bob, &["b"])
    }
}

/// Alice sends `x` three times with different values; Bob collects them in order.
struct Repeated;

impl Protocol for Repeated {
    type Role = Pair;

    fn input_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
        HashMap::new()
    }

    fn output_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
        HashMap::from([(Pair::Bob, vec!["seen"])])
    }

    fn run(&mut self, ctx: &mut Context<Pair>) -> Result<(), Error> {
        ctx.compute(Pair::Bob, &["seen"], |_| Ok(vec![json!([])]), "start empty")?;
        for i in 1..=3 {
            ctx.compute(Pair::Alice, &["x"], |_| Ok(vec![json!(i)]), "next value")?;
            ctx.send_variables(Pair::Alice, Pair::Bob, &["x"])?;
            ctx.compute(
                Pair::Bob,
                &["seen"],
                |p| {
                    let mut seen = p.get_variable("seen")?;
                    if let Some(seen) = seen.as_array_mut() {
                        seen.push(p.get_variable("x")?);
                    }
                    Ok(vec![seen])
                },
                "remember x",
            )?;
        }
        Ok(())
    }
}

/// Alice broadcasts `y` to Bob and Carol.
struct Broadcast;

impl Protocol for Broadcast {
    type Role = Trio;

    fn input_variables(&self) -> HashMap<Trio, Vec<&'static str>> {
        HashMap::from([(Trio::Alice, vec!["y"])])
    }

    fn output_variables(&self) -> HashMap<Trio, Vec<&'static str>> {
        HashMap::from([(Trio::Bob, vec!["y"]), (Trio::Carol, vec!["y"])])
    }

    fn run(&mut self, ctx: &mut Context<Trio>) -> Result<(), Error> {
        ctx.add_comment("alice publishes y");
        ctx.broadcast_variables(Trio::Alice, &["y"])
    }
}

roles! {
    enum Single {
        P => "p",
    }
}

/// Increments `in1` into `out1`.
struct Increment;

impl Protocol for Increment {
    type Role = Single;

    fn input_variables(&self) -> HashMap<Single, Vec<&'static str>> {
        HashMap::from([(Single::P, vec!["in1"])])
    }

    fn output_variables(&self) -> HashMap<Single, Vec<&'static str>> {
        HashMap::from([(Single::P, vec!["out1"])])
    }

    fn run(&mut self, ctx: &mut Context<Single>) -> Result<(), Error> {
        ctx.compute(
            Single::P,
            &["out1"],
            |p| Ok(vec![json!(p.get_variable("in1")?.as_i64().unwrap_or_default() + 1)]),
            "increment",
        )
    }
}

/// Alice runs [`Increment`] on `outer_var` while holding an unrelated `out1`.
struct WrapIncrement;

impl Protocol for WrapIncrement {
    type Role = Pair;

    fn input_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
        HashMap::from([(Pair::Alice, vec!["outer_var", "out1"])])
    }

    fn output_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
        HashMap::from([(Pair::Alice, vec!["outer_result", "out1"])])
    }

    fn run(&mut self, ctx: &mut Context<Pair>) -> Result<(), Error> {
        ctx.run_subroutine_protocol(
            Increment,
            HashMap::from([(Single::P, ctx.party(Pair::Alice))]),
            &HashMap::from([(Single::P, HashMap::from([("in1", "outer_var")]))]),
            &HashMap::from([(Single::P, HashMap::from([("out1", "outer_result")]))]),
        )
    }
}

/// Produces two outputs, `o1` and `o2`.
struct TwoOutputs;

impl Protocol for TwoOutputs {
    type Role = Single;

    fn input_variables(&self) -> HashMap<Single, Vec<&'static str>> {
        HashMap::new()
    }

    fn output_variables(&self) -> HashMap<Single, Vec<&'static str>> {
        HashMap::from([(Single::P, vec!["o1", "o2"])])
    }

    fn run(&mut self, ctx: &mut Context<Single>) -> Result<(), Error> {
        ctx.compute(
            Single::P,
            &["o1", "o2"],
            |_| Ok(vec![json!(1), json!(2)]),
            "constants",
        )
    }
}

/// Runs [`TwoOutputs`] but only names an outer variable for `o1`.
struct PartialOutputMapping;

impl Protocol for PartialOutputMapping {
    type Role = Pair;

    fn input_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
        HashMap::new()
    }

    fn output_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
        HashMap::from([(Pair::Alice, vec!["r1"])])
    }

    fn run(&mut self, ctx: &mut Context<Pair>) -> Result<(), Error> {
        ctx.run_subroutine_protocol(
            TwoOutputs,
            HashMap::from([(Single::P, ctx.party(Pair::Alice))]),
            &HashMap::new(),
            &HashMap::from([(Single::P, HashMap::from([("o1", "r1")]))]),
        )
    }
}

/// Declares reserved names and uses one in the operation selected by `step`.
struct Reserved {
    step: &'static str,
}

impl Protocol for Reserved {
    type Role = Pair;

    fn input_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
        HashMap::from([(Pair::Alice, vec!["_a"])])
    }

    fn output_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
        HashMap::from([(Pair::Bob, vec!["_o"])])
    }

    fn run(&mut self, ctx: &mut Context<Pair>) -> Result<(), Error> {
        match self.step {
            "compute" => ctx.compute(Pair::Alice, &["_c"], |_| Ok(vec![json!(1)]), "reserved"),
            "send" => ctx.send_variables(Pair::Alice, Pair::Bob, &["_s"]),
            _ => ctx.broadcast_variables(Pair::Alice, &["_b"]),
        }
    }
}

/// Runs [`Double`] twice as a subroutine, storing the results under different names.
struct Quadruple;

impl Protocol for Quadruple {
    type Role = Pair;

    fn name(&self) -> &str {
        "Quadruple"
    }

    fn input_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
        HashMap::from([(Pair::Alice, vec!["in"])])
    }

    fn output_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
        HashMap::from([(Pair::Bob, vec!["out1", "out2"])])
    }

    fn run(&mut self, ctx: &mut Context<Pair>) -> Result<(), Error> {
        let assignments = || {
            HashMap::from([
                (Pair::Alice, ctx.party(Pair::Alice)),
                (Pair::Bob, ctx.party(Pair::Bob)),
            ])
        };
        let first = assignments();
        let second = assignments();
        let inputs = HashMap::from([(Pair::Alice, HashMap::from([("a", "in")]))]);
        ctx.run_subroutine_protocol(
            Double,
            first,
            &inputs,
            &HashMap::from([(Pair::Bob, HashMap::from([("b", "out1")]))]),
        )?;
        ctx.compute(
            Pair::Alice,
            &["in"],
            |p| Ok(vec![json!(2 * p.get_variable("in")?.as_i64().unwrap_or_default())]),
            "double the input again",
        )?;
        ctx.run_subroutine_protocol(
            Double,
            second,
            &inputs,
            &HashMap::from([(Pair::Bob, HashMap::from([("b", "out2")]))]),
        )
    }
}

#[test]
fn simulated_two_party_send() -> Result<(), Error> {
    let _guard = init_tracing();
    let mut session = Session::new(Double);
    session.set_input([(Pair::Alice, [("a", json!(21))])])?;
    session.run()?;
    let output = session.get_output()?;
    assert_eq!(output.len(), 1);
    assert_eq!(output[&Pair::Bob]["b"], json!(42));
    Ok(())
}

#[test]
fn repeated_sends_arrive_in_order() -> Result<(), Error> {
    let _guard = init_tracing();
    let mut session = Session::new(Repeated);
    session.run()?;
    assert_eq!(session.get_output()?[&Pair::Bob]["seen"], json!([1, 2, 3]));
    Ok(())
}

#[test]
fn broadcast_is_reported_once() -> Result<(), Error> {
    let _guard = init_tracing();
    let log = EventLog::new();
    let mut session = Session::new(Broadcast);
    session.set_visualiser(log.clone());
    session.set_input([(Trio::Alice, [("y", json!("hello world"))])])?;
    session.run()?;

    let output = session.get_output()?;
    assert_eq!(output[&Trio::Bob]["y"], json!("hello world"));
    assert_eq!(output[&Trio::Carol]["y"], json!("hello world"));

    let events = log.events();
    let messages = events
        .iter()
        .filter(|e| matches!(e, Event::Message { .. }))
        .count();
    assert_eq!(messages, 0);
    assert_eq!(
        events.last(),
        Some(&Event::Broadcast {
            sender: "alice".to_string(),
            variables: [("y".to_string(), Some(json!("hello world")))].into(),
        })
    );
    Ok(())
}

#[test]
fn missing_input_is_rejected_before_assignment() {
    let _guard = init_tracing();
    let mut session = Session::new(Double);
    let err = session
        .set_input([(Pair::Alice, [("c", json!(1))])])
        .unwrap_err();
    match err {
        Error::InvalidProtocolInput {
            party,
            missing,
            unexpected,
        } => {
            assert_eq!(party, "alice");
            assert_eq!(missing, vec!["a"]);
            assert_eq!(unexpected, vec!["c"]);
        }
        err => panic!("unexpected error: {err}"),
    }
    assert!(!session.party(Pair::Alice).borrow().has_variable("c"));
}

#[test]
fn subroutine_outputs_do_not_clobber_each_other() -> Result<(), Error> {
    let _guard = init_tracing();
    let log = EventLog::new();
    let mut session = Session::new(Quadruple);
    session.set_visualiser(log.clone());
    session.set_input([(Pair::Alice, [("in", json!(5))])])?;
    session.run()?;

    let output = session.get_output()?;
    assert_eq!(output[&Pair::Bob]["out1"], json!(10));
    assert_eq!(output[&Pair::Bob]["out2"], json!(20));
    // subroutine variables stay inside the subroutine
    assert!(!session.party(Pair::Bob).borrow().has_variable("b"));
    assert!(!session.party(Pair::Alice).borrow().has_variable("a"));

    let events = log.events();
    let Some(Event::StartSubroutine {
        name,
        roles,
        input_plan,
        ..
    }) = events.first()
    else {
        panic!("expected a subroutine start, got {events:?}");
    };
    assert_eq!(name, "Double");
    assert_eq!(roles["alice"], "alice");
    assert_eq!(input_plan.as_ref().map(|p| p["alice"]["a"].as_str()), Some("in"));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::EndSubroutine { outputs } if outputs["bob"]["b"] == json!(20)
    )));
    Ok(())
}

#[test]
fn subroutine_output_is_renamed_without_clobbering() -> Result<(), Error> {
    let _guard = init_tracing();
    let mut session = Session::new(WrapIncrement);
    session.set_input([(
        Pair::Alice,
        [("outer_var", json!(41)), ("out1", json!("untouched"))],
    )])?;
    session.run()?;
    let output = session.get_output()?;
    assert_eq!(output[&Pair::Alice]["outer_result"], json!(42));
    assert_eq!(output[&Pair::Alice]["out1"], json!("untouched"));
    Ok(())
}

#[test]
fn incomplete_role_assignment_is_rejected() {
    let _guard = init_tracing();
    let outer = Session::new(Double);
    let err = Session::with_parties(
        Double,
        HashMap::from([(Pair::Alice, outer.party(Pair::Alice))]),
    )
    .err();
    assert!(matches!(err, Some(Error::IncompleteRoleAssignment { .. })));
}

#[test]
fn unknown_party_name_is_rejected() {
    let session = Session::new(Double);
    assert_eq!(session.role("bob").ok(), Some(Pair::Bob));
    assert!(matches!(
        session.role("mallory"),
        Err(Error::NonExistentParty { party, .. }) if party == "mallory"
    ));
}

#[test]
fn secure_sum_simulated() -> Result<(), Error> {
    let _guard = init_tracing();
    let mut session = Session::new(SecureSum::default());
    session.set_input([
        (SumRole::Alice, [("x", json!(1_000_000))]),
        (SumRole::Bob, [("x", json!(2_000_000))]),
        (SumRole::Carol, [("x", json!(3))]),
    ])?;
    session.run()?;
    let output = session.get_output()?;
    for role in SumRole::ALL {
        assert_eq!(output[role]["sum"], json!(3_000_003));
    }

    let stats = session.get_party_statistics();
    let total = session.get_total_statistics();
    // three sharing rounds with two sends each, then three broadcasts to two receivers each
    assert_eq!(total.variables_sent, 12);
    assert_eq!(total.variables_received, 12);
    assert_eq!(total.bytes_sent, total.bytes_received);
    assert_eq!(
        total.computations,
        stats.values().map(|s| s.computations).sum::<usize>()
    );
    session.terminate_protocol();
    Ok(())
}

#[test]
fn default_protocol_name() {
    assert_eq!(Repeated.name(), smpc_sim::DEFAULT_PROTOCOL_NAME);
    assert_eq!(Session::new(Repeated).name(), "[Default Protocol Name]");
}

#[test]
fn reserved_names_are_rejected_everywhere() {
    let _guard = init_tracing();
    let is_invalid = |r: Result<(), Error>, expected: &str| {
        matches!(r, Err(Error::InvalidVariableName(name)) if name == expected)
    };

    let mut session = Session::new(Reserved { step: "compute" });
    assert!(is_invalid(
        session.set_input([(Pair::Alice, [("_a", json!(1))])]),
        "_a"
    ));
    assert!(!session.party(Pair::Alice).borrow().has_variable("_a"));
    assert!(is_invalid(session.get_output().map(|_| ()), "_o"));
    assert!(is_invalid(session.run(), "_c"));
    assert!(!session.party(Pair::Alice).borrow().has_variable("_c"));

    let mut session = Session::new(Reserved { step: "send" });
    assert!(is_invalid(session.run(), "_s"));

    let log = EventLog::new();
    let mut session = Session::new(Reserved { step: "broadcast" });
    session.set_visualiser(log.clone());
    assert!(is_invalid(session.run(), "_b"));
    assert!(log.events().is_empty());
}

#[test]
fn missing_output_mapping_writes_nothing() {
    let _guard = init_tracing();
    let mut session = Session::new(PartialOutputMapping);
    let err = session.run().unwrap_err();
    assert!(
        matches!(&err, Error::MissingOutputMapping { role, variable } if role == "p" && variable == "o2"),
        "{err}"
    );
    let alice = session.party(Pair::Alice);
    let alice = alice.borrow();
    assert!(!alice.has_variable("r1"));
    // the subroutine namespace was left despite the failure
    assert!(!alice.has_variable("o1"));
}

#[test]
fn local_party_without_address_is_rejected() {
    let _guard = init_tracing();
    let mut session = Session::new(Double);
    let addresses = HashMap::from([(Pair::Bob, "127.0.0.1:1".to_string())]);
    let err = session
        .set_party_addresses(&addresses, Pair::Alice, std::time::Duration::from_secs(1))
        .unwrap_err();
    assert!(matches!(&err, Error::MissingAddress(party) if party == "alice"), "{err}");
    assert!(session.context().is_running_simulated());
    assert!(session.party(Pair::Bob).borrow().is_local());
}
