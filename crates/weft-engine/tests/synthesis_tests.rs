//! End-to-end synthesis against the managed runtime

use weft_bytecode::descriptor::ROOT_CLASS;
use weft_bytecode::{access, ClassBuilder, ClassNode, FieldNode, Marker, Opcode};
use weft_core::{Value, Vm};
use weft_engine::directive::{
    cast_marker, delegate_marker, template_marker, EXPORT_MARKER, OVERRIDE_MARKER,
};
use weft_engine::{
    Directive, DirectiveKind, SynthOptions, SynthesisError, Synthesizer, TemplateRef, TemplateSpec,
};

const OBJ: &str = "Lweft/lang/Object;";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn default_ctor(builder: ClassBuilder, super_name: &str) -> ClassBuilder {
    let super_name = super_name.to_string();
    builder.method(access::PUBLIC, "<init>", "()V", move |m| {
        m.emit_aload(0)
            .emit_invokespecial(&super_name, "<init>", "()V")
            .emit_return();
    })
}

/// `get()` returns 1; the constructor stores its argument
fn counter() -> ClassNode {
    ClassBuilder::new("demo/Counter")
        .extends(ROOT_CLASS)
        .field(access::PROTECTED, "trace", "I")
        .method(access::PUBLIC, "<init>", "(I)V", |m| {
            m.emit_aload(0)
                .emit_invokespecial(ROOT_CLASS, "<init>", "()V")
                .emit_aload(0)
                .emit_iload(1)
                .emit_putfield("demo/Counter", "trace", "I")
                .emit_return();
        })
        .method(access::PUBLIC, "get", "()I", |m| {
            m.emit_push_int(1).emit_return();
        })
        .build()
}

/// Adds 41 to whatever the base returns
fn answer() -> ClassNode {
    answer_named("demo/Answer")
}

fn answer_named(name: &str) -> ClassNode {
    let owner = name.to_string();
    ClassBuilder::new(name)
        .field(access::PUBLIC, "_super", OBJ)
        .method(access::PUBLIC, "get", "()I", move |m| {
            m.emit_aload(0)
                .emit_getfield(&owner, "_super", OBJ)
                .emit_checkcast("demo/Counter")
                .emit_invokevirtual("demo/Counter", "get", "()I")
                .emit_push_int(41)
                .emit_op(Opcode::Iadd)
                .emit_return();
        })
        .build()
}

/// Counts its own calls and adds the receiver's `trace`
fn tally() -> ClassNode {
    default_ctor(ClassBuilder::new("demo/Tally").extends(ROOT_CLASS), ROOT_CLASS)
        .field(access::PUBLIC, "_super", OBJ)
        .field(access::PUBLIC, "calls", "I")
        .method(access::PUBLIC, "get", "()I", |m| {
            m.marker(delegate_marker())
                .emit_aload(0)
                .emit_aload(0)
                .emit_getfield("demo/Tally", "calls", "I")
                .emit_push_int(1)
                .emit_op(Opcode::Iadd)
                .emit_putfield("demo/Tally", "calls", "I")
                .emit_aload(0)
                .emit_getfield("demo/Tally", "calls", "I")
                .emit_aload(0)
                .emit_getfield("demo/Tally", "_super", OBJ)
                .emit_checkcast("demo/Counter")
                .emit_getfield("demo/Counter", "trace", "I")
                .emit_op(Opcode::Iadd)
                .emit_return();
        })
        .build()
}

fn answer_spec() -> TemplateSpec {
    TemplateSpec::new().override_method("get", "()I")
}

fn runtime() -> Vm {
    init_tracing();
    let vm = Vm::new();
    vm.load_class(&counter()).unwrap();
    vm.register_source_class(&answer());
    vm
}

fn get(vm: &Vm, class: &str, arg: i32) -> i32 {
    let obj = vm.new_instance(class, "(I)V", vec![Value::Int(arg)]).unwrap();
    vm.invoke_virtual(obj, "get", "()I", vec![])
        .unwrap()
        .and_then(|v| v.as_int())
        .unwrap()
}

#[test]
fn test_super_call_plus_41_returns_42() {
    let vm = runtime();
    let synth = Synthesizer::default();
    let out = synth
        .synthesize(&vm, "demo/Counter", TemplateRef::new("demo/Answer").with_spec(answer_spec()))
        .unwrap();

    assert_eq!(get(&vm, &out.name, 0), 42);

    let obj = vm.new_instance(&out.name, "(I)V", vec![Value::Int(0)]).unwrap();
    assert!(vm.is_instance_of(obj, "demo/Counter").unwrap());
    assert_eq!(out.report.super_accesses, 1);
    assert_eq!(out.base, "demo/Counter");
    // the base class itself is untouched
    assert_eq!(get(&vm, "demo/Counter", 0), 1);
}

#[test]
fn test_construct_runs_after_base_constructor() {
    let vm = runtime();
    let template = ClassBuilder::new("demo/Order")
        .field(access::PUBLIC, "_super", OBJ)
        .field(access::PUBLIC, "order", "I")
        .method(access::PUBLIC, "init", "(I)V", |m| {
            m.emit_aload(0)
                .emit_aload(0)
                .emit_getfield("demo/Order", "_super", OBJ)
                .emit_checkcast("demo/Counter")
                .emit_getfield("demo/Counter", "trace", "I")
                .emit_push_int(10)
                .emit_op(Opcode::Imul)
                .emit_push_int(7)
                .emit_op(Opcode::Iadd)
                .emit_putfield("demo/Order", "order", "I")
                .emit_return();
        })
        .build();
    vm.register_source_class(&template);

    let spec = TemplateSpec::new()
        .export("order", "I")
        .construct("init", "(I)V");
    let out = Synthesizer::default()
        .synthesize(&vm, "demo/Counter", TemplateRef::new("demo/Order").with_spec(spec))
        .unwrap();
    assert_eq!(out.report.initialized_constructors, 1);

    // base stored 3 first, then the template body read it
    let obj = vm.new_instance(&out.name, "(I)V", vec![Value::Int(3)]).unwrap();
    assert_eq!(vm.get_field(obj, "trace").unwrap(), Value::Int(3));
    assert_eq!(vm.get_field(obj, "order").unwrap(), Value::Int(37));
}

#[test]
fn test_exported_field_lives_on_synthesized_class() {
    let vm = runtime();
    let template = ClassBuilder::new("demo/Tally")
        .field(access::PRIVATE, "hits", "I")
        .method(access::PUBLIC, "get", "()I", |m| {
            m.emit_aload(0)
                .emit_aload(0)
                .emit_getfield("demo/Tally", "hits", "I")
                .emit_push_int(1)
                .emit_op(Opcode::Iadd)
                .emit_putfield("demo/Tally", "hits", "I")
                .emit_aload(0)
                .emit_getfield("demo/Tally", "hits", "I")
                .emit_return();
        })
        .build();
    vm.register_source_class(&template);

    let spec = TemplateSpec::new()
        .export("hits", "I")
        .override_method("get", "()I");
    let out = Synthesizer::default()
        .synthesize(&vm, "demo/Counter", TemplateRef::new("demo/Tally").with_spec(spec))
        .unwrap();
    assert_eq!(out.report.fields.len(), 1);
    assert_eq!(out.report.redirections, 3);

    let obj = vm.new_instance(&out.name, "(I)V", vec![Value::Int(0)]).unwrap();
    vm.invoke_virtual(obj, "get", "()I", vec![]).unwrap();
    assert_eq!(
        vm.invoke_virtual(obj, "get", "()I", vec![]).unwrap(),
        Some(Value::Int(2))
    );
    assert_eq!(vm.get_field(obj, "hits").unwrap(), Value::Int(2));

    let plain = vm.new_instance("demo/Counter", "(I)V", vec![Value::Int(0)]).unwrap();
    assert!(vm.get_field(plain, "hits").is_err());
}

#[test]
fn test_implementation_satisfies_template_interface() {
    let vm = runtime();
    let greeter = ClassBuilder::new("demo/Greeter")
        .access(access::PUBLIC | access::INTERFACE | access::ABSTRACT)
        .extends(ROOT_CLASS)
        .abstract_method(access::PUBLIC, "greet", "()I")
        .build();
    vm.load_class(&greeter).unwrap();
    let caller = default_ctor(ClassBuilder::new("demo/Caller").extends(ROOT_CLASS), ROOT_CLASS)
        .method(access::PUBLIC | access::STATIC, "call", "(Ldemo/Greeter;)I", |m| {
            m.emit_aload(0)
                .emit_invokeinterface("demo/Greeter", "greet", "()I")
                .emit_return();
        })
        .build();
    vm.load_class(&caller).unwrap();

    let template = ClassBuilder::new("demo/Polite")
        .implements("demo/Greeter")
        .method(access::PUBLIC, "greet", "()I", |m| {
            m.emit_push_int(64).emit_return();
        })
        .build();
    vm.register_source_class(&template);

    let spec = TemplateSpec::new().implement("greet", "()I");
    let out = Synthesizer::default()
        .synthesize(&vm, "demo/Counter", TemplateRef::new("demo/Polite").with_spec(spec))
        .unwrap();
    assert_eq!(out.interfaces, vec!["demo/Greeter".to_string()]);

    let obj = vm.new_instance(&out.name, "(I)V", vec![Value::Int(0)]).unwrap();
    assert!(vm.is_instance_of(obj, "demo/Greeter").unwrap());
    assert_eq!(
        vm.invoke_static("demo/Caller", "call", "(Ldemo/Greeter;)I", vec![Value::Ref(obj)])
            .unwrap(),
        Some(Value::Int(64))
    );
}

#[test]
fn test_override_of_missing_member_defines_nothing() {
    let vm = runtime();
    let synth = Synthesizer::default();
    let spec = answer_spec().override_method("missing", "()I");
    let err = synth
        .synthesize(&vm, "demo/Counter", TemplateRef::new("demo/Answer").with_spec(spec))
        .unwrap_err();
    assert!(matches!(err, SynthesisError::Configuration(_)));
    assert!(vm
        .class_id(&synth.default_name("demo/Counter", "demo/Answer"))
        .is_none());
}

#[test]
fn test_named_outputs_behave_identically() {
    let vm = runtime();
    let synth = Synthesizer::default();
    let template = TemplateRef::new("demo/Answer").with_spec(answer_spec());
    let a = synth
        .synthesize_named(&vm, "demo/Counter", template.clone(), "demo/AnswerA")
        .unwrap();
    let b = synth
        .synthesize_named(&vm, "demo/Counter", template, "demo/AnswerB")
        .unwrap();
    assert_ne!(a.handle, b.handle);
    assert_eq!(get(&vm, "demo/AnswerA", 5), 42);
    assert_eq!(get(&vm, "demo/AnswerB", 5), 42);
}

#[test]
fn test_super_access_reaches_nearest_declaration() {
    let vm = runtime();
    let a = default_ctor(ClassBuilder::new("demo/A").extends(ROOT_CLASS), ROOT_CLASS)
        .method(access::PUBLIC, "get", "()I", |m| {
            m.emit_push_int(1).emit_return();
        })
        .build();
    let b = default_ctor(ClassBuilder::new("demo/B").extends("demo/A"), "demo/A")
        .method(access::PUBLIC, "get", "()I", |m| {
            m.emit_aload(0)
                .emit_invokespecial("demo/A", "get", "()I")
                .emit_push_int(10)
                .emit_op(Opcode::Iadd)
                .emit_return();
        })
        .build();
    vm.load_class(&a).unwrap();
    vm.load_class(&b).unwrap();
    let template = ClassBuilder::new("demo/Pass")
        .field(access::PUBLIC, "_super", OBJ)
        .method(access::PUBLIC, "get", "()I", |m| {
            m.emit_aload(0)
                .emit_getfield("demo/Pass", "_super", OBJ)
                .emit_checkcast("demo/B")
                .emit_invokevirtual("demo/B", "get", "()I")
                .emit_return();
        })
        .build();
    vm.register_source_class(&template);

    let out = Synthesizer::default()
        .synthesize(
            &vm,
            "demo/B",
            TemplateRef::new("demo/Pass").with_spec(answer_spec()),
        )
        .unwrap();
    let obj = vm.new_instance(&out.name, "()V", vec![]).unwrap();
    assert_eq!(
        vm.invoke_virtual(obj, "get", "()I", vec![]).unwrap(),
        Some(Value::Int(11))
    );
}

#[test]
fn test_chained_synthesis_threads_through_previous_layer() {
    let vm = runtime();
    let doubler = ClassBuilder::new("demo/Doubler")
        .field(access::PUBLIC, "_super", OBJ)
        .method(access::PUBLIC, "get", "()I", |m| {
            m.emit_aload(0)
                .emit_getfield("demo/Doubler", "_super", OBJ)
                .emit_checkcast("demo/Counter")
                .emit_invokevirtual("demo/Counter", "get", "()I")
                .emit_push_int(2)
                .emit_op(Opcode::Imul)
                .emit_return();
        })
        .build();
    vm.register_source_class(&doubler);

    let synth = Synthesizer::default();
    let first = synth
        .synthesize(&vm, "demo/Counter", TemplateRef::new("demo/Answer").with_spec(answer_spec()))
        .unwrap();
    let second = synth
        .synthesize(&vm, &first.name, TemplateRef::new("demo/Doubler").with_spec(answer_spec()))
        .unwrap();

    assert_eq!(get(&vm, &first.name, 0), 42);
    assert_eq!(get(&vm, &second.name, 0), 84);
    let obj = vm.new_instance(&second.name, "(I)V", vec![Value::Int(0)]).unwrap();
    assert!(vm.is_instance_of(obj, &first.name).unwrap());
}

#[test]
fn test_cast_directive_matches_base_signature() {
    let vm = runtime();
    let item = default_ctor(ClassBuilder::new("demo/Item").extends(ROOT_CLASS), ROOT_CLASS).build();
    let shelf = default_ctor(ClassBuilder::new("demo/Shelf").extends(ROOT_CLASS), ROOT_CLASS)
        .method(access::PUBLIC, "weigh", "(Ldemo/Item;)I", |m| {
            m.emit_push_int(5).emit_return();
        })
        .build();
    vm.load_class(&item).unwrap();
    vm.load_class(&shelf).unwrap();
    let template = ClassBuilder::new("demo/Scale")
        .field(access::PUBLIC, "_super", OBJ)
        .method(access::PUBLIC, "weigh", "(Lweft/lang/Object;)I", |m| {
            m.emit_aload(0)
                .emit_getfield("demo/Scale", "_super", OBJ)
                .emit_checkcast("demo/Shelf")
                .emit_aload(1)
                .emit_checkcast("demo/Item")
                .emit_invokevirtual("demo/Shelf", "weigh", "(Ldemo/Item;)I")
                .emit_push_int(100)
                .emit_op(Opcode::Iadd)
                .emit_return();
        })
        .build();
    vm.register_source_class(&template);

    let spec = TemplateSpec::new().directive(
        Directive::new(DirectiveKind::Override, "weigh", "(Lweft/lang/Object;)I")
            .cast(0, "demo/Item"),
    );
    let out = Synthesizer::default()
        .synthesize(&vm, "demo/Shelf", TemplateRef::new("demo/Scale").with_spec(spec))
        .unwrap();
    assert_eq!(out.report.casts, 1);
    assert_eq!(out.report.overrides[0].descriptor, "(Ldemo/Item;)I");

    let obj = vm.new_instance(&out.name, "()V", vec![]).unwrap();
    let arg = vm.new_instance("demo/Item", "()V", vec![]).unwrap();
    assert_eq!(
        vm.invoke_virtual(obj, "weigh", "(Ldemo/Item;)I", vec![Value::Ref(arg)])
            .unwrap(),
        Some(Value::Int(105))
    );
}

#[test]
fn test_super_call_with_wide_arguments() {
    let vm = runtime();
    let calc = default_ctor(ClassBuilder::new("demo/Calc").extends(ROOT_CLASS), ROOT_CLASS)
        .method(access::PUBLIC, "scale", "(JI)J", |m| {
            m.emit_lload(1)
                .emit_iload(3)
                .emit_op(Opcode::I2l)
                .emit_op(Opcode::Lmul)
                .emit_return();
        })
        .build();
    vm.load_class(&calc).unwrap();
    let template = ClassBuilder::new("demo/PlusOne")
        .field(access::PUBLIC, "_super", OBJ)
        .method(access::PUBLIC, "scale", "(JI)J", |m| {
            m.emit_aload(0)
                .emit_getfield("demo/PlusOne", "_super", OBJ)
                .emit_checkcast("demo/Calc")
                .emit_lload(1)
                .emit_iload(3)
                .emit_invokevirtual("demo/Calc", "scale", "(JI)J")
                .emit_op(Opcode::Lconst1)
                .emit_op(Opcode::Ladd)
                .emit_return();
        })
        .build();
    vm.register_source_class(&template);

    let spec = TemplateSpec::new().override_method("scale", "(JI)J");
    let out = Synthesizer::default()
        .synthesize(&vm, "demo/Calc", TemplateRef::new("demo/PlusOne").with_spec(spec))
        .unwrap();
    let obj = vm.new_instance(&out.name, "()V", vec![]).unwrap();
    assert_eq!(
        vm.invoke_virtual(obj, "scale", "(JI)J", vec![Value::Long(6), Value::Int(7)])
            .unwrap(),
        Some(Value::Long(43))
    );
}

#[test]
fn test_wide_constructor_parameters() {
    let vm = runtime();
    let account = ClassBuilder::new("demo/Account")
        .extends(ROOT_CLASS)
        .field(access::PROTECTED, "balance", "J")
        .field(access::PROTECTED, "id", "I")
        .method(access::PUBLIC, "<init>", "(JI)V", |m| {
            m.emit_aload(0)
                .emit_invokespecial(ROOT_CLASS, "<init>", "()V")
                .emit_aload(0)
                .emit_lload(1)
                .emit_putfield("demo/Account", "balance", "J")
                .emit_aload(0)
                .emit_iload(3)
                .emit_putfield("demo/Account", "id", "I")
                .emit_return();
        })
        .build();
    vm.load_class(&account).unwrap();
    let template = ClassBuilder::new("demo/Audit")
        .field(access::PUBLIC, "opening", "J")
        .method(access::PUBLIC, "init", "(JI)V", |m| {
            m.emit_aload(0)
                .emit_lload(1)
                .emit_putfield("demo/Audit", "opening", "J")
                .emit_return();
        })
        .build();
    vm.register_source_class(&template);

    let spec = TemplateSpec::new()
        .export("opening", "J")
        .construct("init", "(JI)V");
    let out = Synthesizer::default()
        .synthesize(&vm, "demo/Account", TemplateRef::new("demo/Audit").with_spec(spec))
        .unwrap();

    let big = 5_000_000_000i64;
    let obj = vm
        .new_instance(&out.name, "(JI)V", vec![Value::Long(big), Value::Int(9)])
        .unwrap();
    assert_eq!(vm.get_field(obj, "balance").unwrap(), Value::Long(big));
    assert_eq!(vm.get_field(obj, "id").unwrap(), Value::Int(9));
    assert_eq!(vm.get_field(obj, "opening").unwrap(), Value::Long(big));
}

#[test]
fn test_malformed_super_access_rejected() {
    let vm = runtime();
    let template = ClassBuilder::new("demo/Sloppy")
        .field(access::PUBLIC, "_super", OBJ)
        .method(access::PUBLIC, "get", "()I", |m| {
            m.emit_aload(0)
                .emit_getfield("demo/Sloppy", "_super", OBJ)
                .emit_op(Opcode::Pop)
                .emit_push_int(3)
                .emit_return();
        })
        .build();
    vm.register_source_class(&template);

    let synth = Synthesizer::default();
    let err = synth
        .synthesize(&vm, "demo/Counter", TemplateRef::new("demo/Sloppy").with_spec(answer_spec()))
        .unwrap_err();
    assert!(matches!(err, SynthesisError::RewriteAssumption { .. }));
    assert!(vm
        .class_id(&synth.default_name("demo/Counter", "demo/Sloppy"))
        .is_none());
}

#[test]
fn test_unknown_directive_member() {
    let vm = runtime();
    let spec = TemplateSpec::new().implement("nothing", "()I");
    let err = Synthesizer::default()
        .synthesize(&vm, "demo/Counter", TemplateRef::new("demo/Answer").with_spec(spec))
        .unwrap_err();
    assert!(matches!(err, SynthesisError::Configuration(_)));
}

#[test]
fn test_missing_template_is_fatal() {
    let vm = runtime();
    let err = Synthesizer::default()
        .synthesize(&vm, "demo/Counter", TemplateRef::new("demo/Ghost").with_spec(answer_spec()))
        .unwrap_err();
    assert!(matches!(err, SynthesisError::MissingSource(name) if name == "demo/Ghost"));
}

#[test]
fn test_name_collision_leaves_first_class_working() {
    let vm = runtime();
    let synth = Synthesizer::default();
    let template = TemplateRef::new("demo/Answer").with_spec(answer_spec());
    let first = synth
        .synthesize(&vm, "demo/Counter", template.clone())
        .unwrap();
    let err = synth.synthesize(&vm, "demo/Counter", template).unwrap_err();
    assert!(matches!(err, SynthesisError::LoadCollision(name) if name == first.name));
    assert_eq!(get(&vm, &first.name, 0), 42);
}

#[test]
fn test_get_or_synthesize_reuses_class() {
    let vm = runtime();
    let synth = Synthesizer::default();
    let template = TemplateRef::new("demo/Answer").with_spec(answer_spec());
    let first = synth
        .get_or_synthesize(&vm, "demo/Counter", template.clone())
        .unwrap();
    let again = synth.get_or_synthesize(&vm, "demo/Counter", template).unwrap();
    assert_eq!(first.handle, again.handle);
    assert_eq!(first.name, again.name);
}

#[test]
fn test_synthesized_class_is_reused_by_get_or_synthesize() {
    let vm = runtime();
    let synth = Synthesizer::default();
    let template = TemplateRef::new("demo/Answer").with_spec(answer_spec());
    let made = synth.synthesize(&vm, "demo/Counter", template.clone()).unwrap();
    let reused = synth.get_or_synthesize(&vm, "demo/Counter", template).unwrap();
    assert_eq!(reused.handle, made.handle);
    assert_eq!(get(&vm, &reused.name, 0), 42);
}

#[test]
fn test_get_or_synthesize_rejects_changed_directives() {
    let vm = runtime();
    let synth = Synthesizer::default();
    let plain = TemplateRef::new("demo/Answer").with_spec(TemplateSpec::new());
    let first = synth.get_or_synthesize(&vm, "demo/Counter", plain).unwrap();
    assert_eq!(get(&vm, &first.name, 0), 1);

    let overriding = TemplateRef::new("demo/Answer").with_spec(answer_spec());
    assert!(matches!(
        synth.get_or_synthesize(&vm, "demo/Counter", overriding),
        Err(SynthesisError::Configuration(_))
    ));
}

#[test]
fn test_concurrent_synthesis_defines_each_class_once() {
    const TEMPLATES: usize = 4;
    const THREADS: usize = 16;

    let vm = runtime();
    for i in 0..TEMPLATES {
        vm.register_source_class(&answer_named(&format!("demo/Answer{}", i)));
    }
    let synth = Synthesizer::default();

    let results: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let (vm, synth) = (&vm, &synth);
                scope.spawn(move || {
                    let template = TemplateRef::new(format!("demo/Answer{}", t % TEMPLATES))
                        .with_spec(answer_spec());
                    let shared = synth
                        .get_or_synthesize(vm, "demo/Counter", template.clone())
                        .unwrap();
                    let own = synth
                        .synthesize_named(vm, "demo/Counter", template, &format!("demo/Own{}", t))
                        .unwrap();
                    (t % TEMPLATES, shared, own)
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    for (index, shared, own) in &results {
        assert_eq!(vm.class_id(&shared.name), Some(shared.handle));
        assert_eq!(vm.class_id(&own.name), Some(own.handle));
        assert_eq!(get(&vm, &shared.name, 0), 42);
        assert_eq!(get(&vm, &own.name, 0), 42);
        let cached = synth
            .cached("demo/Counter", &format!("demo/Answer{}", index))
            .unwrap();
        assert_eq!(cached.handle, shared.handle);
    }

    let mut shared: Vec<_> = results.iter().map(|(_, s, _)| s.handle).collect();
    shared.sort();
    shared.dedup();
    assert_eq!(shared.len(), TEMPLATES);

    let mut own: Vec<_> = results.iter().map(|(_, _, o)| o.handle).collect();
    own.sort();
    own.dedup();
    assert_eq!(own.len(), THREADS);
}

#[test]
fn test_delegated_override_calls_bound_template_instance() {
    let vm = runtime();
    vm.load_class(&tally()).unwrap();
    let instance = vm.new_instance("demo/Tally", "()V", vec![]).unwrap();

    let synth = Synthesizer::default();
    let out = synth
        .synthesize_with_instance(&vm, "demo/Counter", "demo/Tally", &instance)
        .unwrap();
    assert_eq!(out.template_slot.as_deref(), Some("_template"));
    assert_eq!(out.report.delegated.len(), 1);
    assert_eq!(out.report.super_accesses, 0);
    assert_eq!(vm.get_static(&out.name, "_template").unwrap(), Value::Ref(instance));

    let first = vm.new_instance(&out.name, "(I)V", vec![Value::Int(10)]).unwrap();
    let second = vm.new_instance(&out.name, "(I)V", vec![Value::Int(20)]).unwrap();
    let call = |obj| {
        vm.invoke_virtual(obj, "get", "()I", vec![])
            .unwrap()
            .and_then(|v| v.as_int())
            .unwrap()
    };
    // one template instance counts calls across every receiver
    assert_eq!(call(first), 11);
    assert_eq!(call(second), 22);
    assert_eq!(call(first), 13);
    assert_eq!(vm.get_field(instance, "calls").unwrap(), Value::Int(3));
    assert_eq!(vm.get_field(instance, "_super").unwrap(), Value::Ref(first));
}

#[test]
fn test_delegation_rejects_foreign_instance() {
    let vm = runtime();
    vm.load_class(&tally()).unwrap();
    let foreign = vm.new_instance("demo/Counter", "(I)V", vec![Value::Int(0)]).unwrap();

    let synth = Synthesizer::default();
    let err = synth
        .synthesize_with_instance(&vm, "demo/Counter", "demo/Tally", &foreign)
        .unwrap_err();
    assert!(matches!(err, SynthesisError::Configuration(msg) if msg.contains("not an instance")));
    assert!(vm
        .class_id(&synth.default_name("demo/Counter", "demo/Tally"))
        .is_none());
}

#[test]
fn test_directives_read_from_markers() {
    let vm = runtime();
    let mut count = FieldNode::new(access::PUBLIC, "count", "I");
    count.markers.push(Marker::new(EXPORT_MARKER));
    let template = ClassBuilder::new("demo/Marked")
        .marker(template_marker("base"))
        .field(access::PUBLIC, "base", OBJ)
        .field_with(count)
        .method(access::PUBLIC, "get", "()I", |m| {
            m.marker(Marker::new(OVERRIDE_MARKER))
                .emit_aload(0)
                .emit_getfield("demo/Marked", "base", OBJ)
                .emit_checkcast("demo/Counter")
                .emit_invokevirtual("demo/Counter", "get", "()I")
                .emit_push_int(41)
                .emit_op(Opcode::Iadd)
                .emit_return();
        })
        .build();
    vm.register_source_class(&template);

    let out = Synthesizer::default()
        .synthesize(&vm, "demo/Counter", "demo/Marked")
        .unwrap();
    assert_eq!(out.report.fields.len(), 1);
    assert_eq!(get(&vm, &out.name, 0), 42);
}

#[test]
fn test_cast_marker_on_scanned_template() {
    let vm = runtime();
    let item = default_ctor(ClassBuilder::new("demo/Part").extends(ROOT_CLASS), ROOT_CLASS).build();
    let bin = default_ctor(ClassBuilder::new("demo/Bin").extends(ROOT_CLASS), ROOT_CLASS)
        .method(access::PUBLIC, "accept", "(Ldemo/Part;)I", |m| {
            m.emit_push_int(0).emit_return();
        })
        .build();
    vm.load_class(&item).unwrap();
    vm.load_class(&bin).unwrap();
    let template = ClassBuilder::new("demo/AnyBin")
        .method(access::PUBLIC, "accept", "(Lweft/lang/Object;)I", |m| {
            m.marker(Marker::new(OVERRIDE_MARKER))
                .marker(cast_marker(0, "demo/Part"))
                .emit_push_int(1)
                .emit_return();
        })
        .build();
    vm.register_source_class(&template);

    let out = Synthesizer::default()
        .synthesize(&vm, "demo/Bin", "demo/AnyBin")
        .unwrap();
    let obj = vm.new_instance(&out.name, "()V", vec![]).unwrap();
    let part = vm.new_instance("demo/Part", "()V", vec![]).unwrap();
    assert_eq!(
        vm.invoke_virtual(obj, "accept", "(Ldemo/Part;)I", vec![Value::Ref(part)])
            .unwrap(),
        Some(Value::Int(1))
    );
}

#[test]
fn test_options_from_json_change_shadow_name() {
    let vm = runtime();
    let options = SynthOptions::from_json(r#"{"shadow_prefix": "base_"}"#).unwrap();
    let synth = Synthesizer::new(options);
    let out = synth
        .synthesize(&vm, "demo/Counter", TemplateRef::new("demo/Answer").with_spec(answer_spec()))
        .unwrap();
    assert_eq!(out.report.shadows[0].name, "base_get");
    assert_eq!(get(&vm, &out.name, 0), 42);
}
