use slc::{
    arch::{AluOp, Inst, Reg8, IMAGE_BASE},
    ast::Scalar,
    codegen::{Generator, Slot, Storage},
    lex::Lexer,
    parse::Parser,
    sim::{Exit, Machine},
    sink::Image,
    source,
};

const MAX_STEPS: u64 = 1_000_000;

fn session(text: &str) -> Generator<Image> {
    let (start, chars) = source::chars(text.as_bytes(), "test.sl");
    let tokens = Lexer::new(start, chars).try_exhaustive().unwrap();

    let mut parser = Parser::new(tokens.into_iter());
    let mut generator = Generator::new(Image::new()).unwrap();

    while let Some(declaration) = parser.next_declaration(generator.names_mut()).unwrap() {
        generator.declare(declaration).unwrap();
    }

    generator
}

fn build(text: &str) -> Result<Vec<u8>, String> {
    slc::compile(text.as_bytes(), "test.sl", Image::new())
        .map(|output| output.sink.into_bytes())
        .map_err(|diagnostics| diagnostics.to_string())
}

fn run(text: &str, input: &[u8]) -> (Exit, Machine) {
    let image = build(text).unwrap();
    let mut machine = Machine::new(&image).unwrap().with_input(input);

    let exit = machine.run(MAX_STEPS).unwrap();
    (exit, machine)
}

fn global(generator: &Generator<Image>, name: &str) -> u16 {
    let name = generator.names().lookup(name).unwrap();
    match generator.symbols().variable(name).unwrap().storage {
        Storage::Direct(Slot::Global(address)) => address,
        other => panic!("not a direct global: {:?}", other),
    }
}

fn function(generator: &Generator<Image>, name: &str) -> u16 {
    let name = generator.names().lookup(name).unwrap();
    generator.relocations().resolve(name, generator.names()).unwrap()
}

/// Decodifica desde `from` hasta el primer byte desconocido.
fn code(image: &[u8], from: u16) -> Vec<Inst> {
    let mut offset = (from - IMAGE_BASE) as usize;
    let mut insts = Vec::new();

    while let Some((inst, size)) = image.get(offset..).and_then(Inst::decode) {
        insts.push(inst);
        offset += size;
    }

    insts
}

fn contains(code: &[Inst], sequence: &[Inst]) -> bool {
    code.windows(sequence.len()).any(|window| window == sequence)
}

#[test]
fn global_store_and_reload() {
    let text = "var byte a\n\
                fun main() byte\n\
                \x20 a = 5\n\
                \x20 a = a + 1\n\
                \x20 return a\n\
                end\n";

    let generator = session(text);
    let a = global(&generator, "a");
    let main = function(&generator, "main");

    let image = generator.finish().unwrap().sink.into_bytes();
    assert_eq!(image[(a - IMAGE_BASE) as usize], 0);

    let main = code(&image, main);
    assert!(contains(&main, &[Inst::LdImm8(Reg8::A, 5), Inst::LdAddrFromA(a)]));
    assert!(main.contains(&Inst::LdAFromAddr(a)));
    assert_eq!(main.iter().filter(|&&inst| inst == Inst::LdAddrFromA(a)).count(), 2);

    let mut machine = Machine::new(&image).unwrap();
    assert_eq!(machine.run(MAX_STEPS).unwrap(), Exit::Returned { a: 6, hl: 6 });
    assert_eq!(machine.read_byte(a), 6);
}

#[test]
fn struct_field_store() {
    let text = "struct P\n\
                \x20 var byte x\n\
                \x20 var byte y\n\
                end\n\
                var P p\n\
                fun main()\n\
                \x20 p.y = 3\n\
                end\n";

    let generator = session(text);
    let p = global(&generator, "p");
    let main = function(&generator, "main");

    let struct_name = generator.names().lookup("P").unwrap();
    let definition = generator.symbols().struct_def(struct_name).unwrap();
    assert_eq!(definition.size, 2);

    let y = generator.names().lookup("y").unwrap();
    assert_eq!(definition.field(y).unwrap().offset, 1);

    let image = generator.finish().unwrap().sink.into_bytes();
    let main = code(&image, main);
    assert!(contains(&main, &[Inst::LdImm8(Reg8::A, 3), Inst::LdAddrFromA(p + 1)]));

    let mut machine = Machine::new(&image).unwrap();
    machine.run(MAX_STEPS).unwrap();
    assert_eq!(machine.read_byte(p), 0);
    assert_eq!(machine.read_byte(p + 1), 3);
}

#[test]
fn forward_call_is_patched() {
    let text = "fun main()\n\
                \x20 return later(4)\n\
                end\n\
                fun later(byte x)\n\
                \x20 return x * 10\n\
                end\n";

    let generator = session(text);
    let main = function(&generator, "main");
    let later = function(&generator, "later");

    let image = generator.finish().unwrap().sink.into_bytes();
    assert!(code(&image, main).contains(&Inst::Call(later)));

    let mut machine = Machine::new(&image).unwrap();
    assert!(matches!(machine.run(MAX_STEPS).unwrap(), Exit::Returned { hl: 40, .. }));
}

#[test]
fn forward_call_checked_against_late_prototype() {
    let text = "fun main()\n  later(1, 2)\nend\nfun later(byte x)\n  return x\nend\n";
    let message = build(text).unwrap_err();
    assert!(message.contains("Function `later` exceeds the limit of 1 parameters"));
    assert!(message.contains("test.sl:[2:"));

    let text = "var array 2 byte t\nfun main()\n  later(t)\nend\nfun later(byte x)\nend\n";
    let message = build(text).unwrap_err();
    assert!(message.contains("expected `byte`, found `array 2 byte`"));

    let text = "fun main()\n  nope(1)\nend\n";
    let message = build(text).unwrap_err();
    assert!(message.contains("Unknown function `nope`"));
}

#[test]
fn short_circuit_conjunction() {
    for a in [3, 7] {
        for b in [1, 4] {
            let text = format!(
                "var byte a = {}\n\
                 var byte b = {}\n\
                 fun main() byte\n\
                 \x20 var byte r = 0\n\
                 \x20 if a < 5 & b > 2\n\
                 \x20   r = 1\n\
                 \x20 end\n\
                 \x20 return r\n\
                 end\n",
                a, b
            );

            let generator = session(&text);
            let main = function(&generator, "main");
            let image = generator.finish().unwrap().sink.into_bytes();

            let compares = code(&image, main)
                .into_iter()
                .filter(|&inst| inst == Inst::Alu(AluOp::Cp, Reg8::E))
                .count();

            assert_eq!(compares, 2);

            let expected = u8::from(a < 5 && b > 2);
            let mut machine = Machine::new(&image).unwrap();
            match machine.run(MAX_STEPS).unwrap() {
                Exit::Returned { a: result, .. } => assert_eq!(result, expected, "a={} b={}", a, b),
                other => panic!("unexpected exit: {:?}", other),
            }
        }
    }
}

#[test]
fn disjunction_and_else() {
    let source = |n| {
        format!(
            "fun pick(byte n) byte\n\
             \x20 if n > 100 | n = 0\n\
             \x20   return 1\n\
             \x20 else\n\
             \x20   return 2\n\
             \x20 end\n\
             end\n\
             fun main() byte\n\
             \x20 return pick({})\n\
             end\n",
            n
        )
    };

    for (n, expected) in [(0, 1), (50, 2), (200, 1)] {
        let (exit, _) = run(&source(n), b"");
        assert!(matches!(exit, Exit::Returned { a, .. } if a == expected), "n={}", n);
    }
}

#[test]
fn array_sum_through_reference_parameter() {
    let text = "var array 5 byte data = [1, 2, 3, 4, 5]\n\
                fun sum(array byte v, byte n) word\n\
                \x20 var byte i = 0\n\
                \x20 var word s = 0\n\
                \x20 while i < n\n\
                \x20   s = s + v[i]\n\
                \x20   i = i + 1\n\
                \x20 end\n\
                \x20 return s\n\
                end\n\
                fun main()\n\
                \x20 return sum(data, 5)\n\
                end\n";

    let (exit, _) = run(text, b"");
    assert!(matches!(exit, Exit::Returned { hl: 15, .. }));
}

#[test]
fn struct_arrays_multiply_and_shift() {
    let text = "struct P\n\
                \x20 var word x\n\
                \x20 var word y\n\
                end\n\
                var P p\n\
                var array 3 P pts\n\
                fun main() word\n\
                \x20 var byte k = 2\n\
                \x20 p.x = 50\n\
                \x20 p.y = 57\n\
                \x20 pts[k].y = p.y * p.x + (p.x << 2)\n\
                \x20 return pts[2].y\n\
                end\n";

    let (exit, _) = run(text, b"");
    assert!(matches!(exit, Exit::Returned { hl: 3050, .. }));
}

#[test]
fn services() {
    let text = "fun main() byte\n\
                \x20 var byte c = getc()\n\
                \x20 putc(c + 1)\n\
                \x20 putc(33)\n\
                \x20 return c\n\
                end\n";

    let (exit, machine) = run(text, b"A");
    assert_eq!(machine.output(), b"B!");
    assert!(matches!(exit, Exit::Returned { a: b'A', .. }));

    let (exit, _) = run("fun main()\n  exit(3)\n  putc(65)\nend\n", b"");
    assert_eq!(exit, Exit::Exited(3));
}

#[test]
fn array_pointers_are_reassigned() {
    let text = "var array 3 byte t = [7, 8, 9]\n\
                var array byte g\n\
                fun main() byte\n\
                \x20 var array byte p = t\n\
                \x20 g = t\n\
                \x20 p[1] = 5\n\
                \x20 return p[1] + g[2] + t[1]\n\
                end\n";

    let generator = session(text);
    let t = global(&generator, "t");

    let g = generator.names().lookup("g").unwrap();
    let g = match generator.symbols().variable(g).unwrap().storage {
        Storage::Reference(Slot::Global(address)) => address,
        other => panic!("not a global pointer: {:?}", other),
    };

    let image = generator.finish().unwrap().sink.into_bytes();
    let mut machine = Machine::new(&image).unwrap();
    assert!(matches!(machine.run(MAX_STEPS).unwrap(), Exit::Returned { a: 19, .. }));

    assert_eq!(machine.read_byte(g), t as u8);
    assert_eq!(machine.read_byte(g + 1), (t >> 8) as u8);
    assert_eq!(machine.read_byte(t + 1), 5);

    let text = "var array 3 word w\nvar array byte g\nfun main()\n  g = w\nend\n";
    let message = build(text).unwrap_err();
    assert!(message.contains("expected `array byte`, found `array 3 word`"), "{}", message);
}

#[test]
fn runtime_shift_count_saturates() {
    let text = "fun move_left(word x, word n) word\n\
                \x20 return x << n\n\
                end\n\
                fun main() word\n\
                \x20 return move_left(1, 256) + move_left(1, 3) + move_left(3, 15)\n\
                end\n";

    let (exit, _) = run(text, b"");
    assert!(matches!(exit, Exit::Returned { hl: 0x8008, .. }), "{:?}", exit);
}

#[test]
fn services_are_predeclared() {
    let generator = Generator::new(Image::new()).unwrap();
    let getc = generator.names().lookup("getc").unwrap();
    let prototype = generator.symbols().prototype(getc).unwrap();

    assert!(prototype.params.is_empty());
    assert_eq!(prototype.returns, Scalar::Byte);

    let message = build("fun getc(byte x)\nend\nfun main()\nend\n").unwrap_err();
    assert!(message.contains("conflicting declarations of `getc`"), "{}", message);
}

#[test]
fn bounds_checks() {
    let text = "var array 3 byte t\nfun main()\n  t[3] = 1\nend\n";
    let message = build(text).unwrap_err();
    assert!(message.contains("Index 3 is out of bounds for length 3"));

    let source = |index| {
        format!(
            "var array 3 byte t = [7, 8, 9]\n\
             fun main() byte\n\
             \x20 var byte i = {}\n\
             \x20 return t[i]\n\
             end\n",
            index
        )
    };

    let (exit, _) = run(&source(2), b"");
    assert!(matches!(exit, Exit::Returned { a: 9, .. }));

    let (exit, _) = run(&source(3), b"");
    assert!(matches!(exit, Exit::BoundsTrap { .. }));
}

#[test]
fn frame_covers_nested_locals() {
    let text = "struct P\n\
                \x20 var word x\n\
                \x20 var array 3 byte y\n\
                end\n\
                fun main()\n\
                \x20 var byte i = 0\n\
                \x20 while i < 2\n\
                \x20   var array 4 byte buf\n\
                \x20   if i = 1\n\
                \x20     var P p\n\
                \x20   else\n\
                \x20     var word w\n\
                \x20   end\n\
                \x20   i = i + 1\n\
                \x20 end\n\
                end\n";

    let generator = session(text);
    let main = function(&generator, "main");
    let image = generator.finish().unwrap().sink.into_bytes();

    let frame: u16 = 1 + 4 + 5 + 2;
    let prologue = &code(&image, main)[..4];
    assert_eq!(prologue[3], Inst::LdImm16(slc::arch::Reg16::HL, 0u16.wrapping_sub(frame)));
}

#[test]
fn relocations_resolve_to_definitions() {
    let text = "fun main()\n\
                \x20 var word x = twice(3) * 7\n\
                \x20 while x > 0\n\
                \x20   x = x - 1\n\
                \x20 end\n\
                end\n\
                fun twice(word v) word\n\
                \x20 return v + v\n\
                end\n";

    let generator = session(text);
    let expected: Vec<(u16, u16)> = generator
        .relocations()
        .pending()
        .iter()
        .map(|reference| {
            let address = generator
                .relocations()
                .resolve(reference.name, generator.names())
                .unwrap();

            (reference.patch, address)
        })
        .collect();

    assert!(!expected.is_empty());

    let image = generator.finish().unwrap().sink.into_bytes();
    for (patch, address) in expected {
        let patch = patch as usize;
        assert_eq!(&image[patch..patch + 2], &address.to_le_bytes());
    }
}

#[test]
fn compilation_is_deterministic() {
    let text = "var array 4 word t = [1, 2]\n\
                fun main() word\n\
                \x20 t[1] = t[0] << 3\n\
                \x20 return later(t[1])\n\
                end\n\
                fun later(word v) word\n\
                \x20 return v * 3\n\
                end\n";

    assert_eq!(build(text).unwrap(), build(text).unwrap());
}

#[test]
fn reported_errors() {
    let params: Vec<_> = (0..17).map(|i| format!("byte p{}", i)).collect();
    let many = format!("fun many({})\nend\n", params.join(", "));

    let cases = [
        ("fun main()\n  var array 40000 byte big\nend\n", "Invalid size: local variables exceed"),
        (many.as_str(), "Function `many` exceeds the limit of 16 parameters"),
        ("var array 2 byte t\nfun main()\n  return t\nend\n", "`t` is an aggregate"),
        (
            "fun main()\n  var array 2 byte t = [1, 2]\nend\n",
            "Unsupported construct: list initializer on a local variable",
        ),
        (
            "var array 40000 byte a\nvar array 40000 byte b\n",
            "Invalid size: program does not fit in the address space",
        ),
        ("fun main()\n  x = 1\nend\n", "Unknown variable `x`"),
        ("var Q q\n", "Unknown struct `Q`"),
        ("var byte a = 300\n", "Invalid size"),
        ("fun main()\nend\nfun main()\nend\n", "Symbol `main` is defined more than once"),
        ("fun f()\nend\n", "Unknown function `main`"),
    ];

    for (text, expected) in cases {
        let message = build(text).unwrap_err();
        assert!(message.contains(expected), "{:?}: {}", text, message);
    }
}
