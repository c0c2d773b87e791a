use grackle_console::Console;
use vm::{load_and_run, Fault, Op, Vm, VmRam};

fn run(rom: &[u8]) -> (Console, u8) {
    let mut ram = VmRam::new();
    let mut console = Console::new();
    let code = load_and_run(rom, &mut ram, &mut console);
    (console, code)
}

fn text(console: &mut Console) -> String {
    String::from_utf8(console.stdout()).expect("output is not UTF-8")
}

#[test]
fn prints_byte_literals_in_decimal() {
    let mut rom = vec![];
    for v in [0u8, 1, 127, 128, 255] {
        rom.extend_from_slice(&[Op::U8 as u8, v]);
    }
    rom.push(Op::Dots as u8);
    rom.push(Op::Halt as u8);
    let (mut console, code) = run(&rom);
    assert_eq!(text(&mut console), " 0 1 127 128 255");
    assert_eq!(code, 0);
}

#[test]
fn prints_halfword_literals() {
    let mut rom = vec![];
    for v in [0u16, 1, 256, 32768, 65535] {
        rom.push(Op::U16 as u8);
        rom.extend_from_slice(&v.to_le_bytes());
    }
    rom.push(Op::Dots as u8);
    rom.push(Op::Halt as u8);
    let (mut console, code) = run(&rom);
    assert_eq!(text(&mut console), " 0 1 256 32768 65535");
    assert_eq!(code, 0);
}

#[test]
fn prints_words_in_decimal() {
    let mut rom = vec![];
    for v in [0i32, 1, i32::MAX, i32::MIN, -1] {
        rom.push(Op::I32 as u8);
        rom.extend_from_slice(&v.to_le_bytes());
    }
    rom.push(Op::Dots as u8);
    rom.push(Op::Halt as u8);
    let (mut console, code) = run(&rom);
    assert_eq!(text(&mut console), " 0 1 2147483647 -2147483648 -1");
    assert_eq!(code, 0);
}

#[test]
fn prints_words_in_hex() {
    let mut rom = vec![];
    for v in [0i32, 1, i32::MAX, i32::MIN, -1] {
        rom.push(Op::I32 as u8);
        rom.extend_from_slice(&v.to_le_bytes());
    }
    rom.push(Op::Dotsh as u8);
    rom.push(Op::Halt as u8);
    let (mut console, code) = run(&rom);
    assert_eq!(text(&mut console), " 0 1 7fffffff 80000000 ffffffff");
    assert_eq!(code, 0);
}

#[test]
fn hello_world() {
    let message = b"hello, world\n";
    let mut rom = vec![Op::Str as u8, message.len() as u8];
    rom.extend_from_slice(message);
    rom.push(Op::Print as u8);
    rom.push(Op::Halt as u8);
    let (mut console, code) = run(&rom);
    assert_eq!(text(&mut console), "hello, world\n");
    assert_eq!(code, 0);
}

#[test]
fn halt_stops_the_program() {
    let rom = [Op::Halt as u8, Op::U8 as u8, b'x', Op::Emit as u8];
    let (mut console, code) = run(&rom);
    assert_eq!(console.stdout(), b"");
    assert_eq!(code, 0);
}

#[test]
fn empty_stack_markers() {
    let rom = [Op::Dots as u8, Op::Dotrh as u8, Op::Halt as u8];
    let (mut console, code) = run(&rom);
    assert_eq!(text(&mut console), " Stack is empty Return stack is empty");
    assert_eq!(code, 0);
}

#[test]
fn dump_rows_with_ascii_gutter() {
    let rom = [
        Op::U16 as u8,
        0x00,
        0x02,
        Op::U8 as u8,
        16,
        Op::Dump as u8,
        Op::Halt as u8,
    ];
    let mut ram = VmRam::new();
    let mut vm = Vm::new(&rom, &mut ram);
    vm.ram_mut()[0x200..0x210].copy_from_slice(b"grackle rides ok");
    let mut console = Console::new();
    vm.run(&mut console);
    assert_eq!(
        text(&mut console),
        "0200  67726163 6b6c6520 72696465 73206f6b  grac kle  ride s ok\n"
    );
    assert_eq!(vm.error(), 0);
}

#[test]
fn reports_faults_to_the_console() {
    let rom = [Op::Drop as u8, Op::Halt as u8];
    let (console, code) = run(&rom);
    assert_eq!(console.faults(), [Fault::DataUnderflow.code()]);
    assert_eq!(code, Fault::DataUnderflow.code());
}

#[test]
fn bad_opcode_code_returned() {
    let rom = [0x39];
    let (console, code) = run(&rom);
    assert_eq!(code, Fault::BadOpcode.code());
    assert_eq!(console.faults(), [Fault::BadOpcode.code()]);
}
