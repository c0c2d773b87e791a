use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use grackle_vm::{EmptyHost, Vm, VmRam};

/// Iterative fibonacci, keeping three word variables in high RAM
///
/// Computes fib(24) = 46368 and leaves it on the data stack.
const FIB_ROM: [u8; 59] = [
    0x02, 0x00, // 0:  U8 0
    0x03, 0x00, 0xf0, // 2:  U16 0xf000
    0x11, // 5:  SW          a = 0
    0x02, 0x01, // 6:  U8 1
    0x03, 0x04, 0xf0, // 8:  U16 0xf004
    0x11, // 11: SW          b = 1
    0x02, 0x18, // 12: U8 24
    0x03, 0x08, 0xf0, // 14: U16 0xf008
    0x11, // 17: SW          i = 24
    0x03, 0x08, 0xf0, // 18: U16 0xf008  loop:
    0x10, // 21: LW
    0x06, 0x1f, // 22: BZ +31       exit when i == 0
    0x03, 0x04, 0xf0, // 24: U16 0xf004
    0x10, // 27: LW
    0x2a, // 28: DUP
    0x03, 0x00, 0xf0, // 29: U16 0xf000
    0x10, // 32: LW
    0x14, // 33: ADD
    0x03, 0x04, 0xf0, // 34: U16 0xf004
    0x11, // 37: SW          b = b + a
    0x03, 0x00, 0xf0, // 38: U16 0xf000
    0x11, // 41: SW          a = old b
    0x03, 0x08, 0xf0, // 42: U16 0xf008
    0x10, // 45: LW
    0x13, // 46: DEC
    0x03, 0x08, 0xf0, // 47: U16 0xf008
    0x11, // 50: SW          i = i - 1
    0x08, 0xde, 0xff, // 51: JMP -34      back to loop
    0x03, 0x00, 0xf0, // 54: U16 0xf000  exit:
    0x10, // 57: LW
    0x01, // 58: HALT
];

fn fibonacci(c: &mut Criterion) {
    let mut ram = VmRam::new();
    let mut vm = Vm::new(&FIB_ROM, &mut ram);
    vm.run(&mut EmptyHost);
    assert_eq!(vm.stack().entries().last(), Some(46368));
    assert_eq!(vm.error(), 0);

    c.bench_function("fib_24", |b| {
        b.iter(|| {
            let mut ram = VmRam::new();
            let mut vm = Vm::new(black_box(&FIB_ROM), &mut ram);
            vm.run(&mut EmptyHost);
            black_box(vm.error())
        })
    });
}

criterion_group!(benches, fibonacci);
criterion_main!(benches);
