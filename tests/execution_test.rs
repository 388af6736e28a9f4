//! End-to-end execution of hand-assembled story images: text output,
//! arithmetic, branching, calls and the stack opcodes.

use flathead::machine::ExitReason;
use flathead::test_util::{encode_zstring, story_with_code, StoryBuilder, TestHost};

fn run_and_capture(code: &[u8]) -> (ExitReason, String) {
    let host = TestHost::new();
    let output = host.output.clone();
    let mut machine = StoryBuilder::new().main_code(code).build_machine_with(host);
    let reason = machine.run().expect("program should run to completion");
    let text = output.borrow().clone();
    (reason, text)
}

#[test]
fn hello_loop() {
    // print "Hi"; new_line; quit
    let mut code = vec![0xB2];
    code.extend(encode_zstring("Hi"));
    code.push(0xBB);
    code.push(0xBA);

    let (reason, output) = run_and_capture(&code);
    assert_eq!(reason, ExitReason::Quit);
    assert_eq!(output, "Hi\n");
}

#[test]
fn arithmetic_through_globals() {
    // store G0 3; store G1 7; add G0 G1 -> G2; print_num G2; quit
    let code = vec![
        0x0D, 0x10, 0x03, // store (long, small small)
        0x0D, 0x11, 0x07,
        0x74, 0x10, 0x11, 0x12, // add (long, variable variable), store G2
        0xE6, 0xBF, 0x12, // print_num (var form, variable operand)
        0xBA,
    ];
    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "10");
}

#[test]
fn branch_on_false_falls_through_when_condition_holds() {
    // jz #0 with sense=false: condition is true so execution falls
    // through and both strings print.
    let mut code = vec![0x90, 0x00, 0x45]; // offset 5 lands on the second print
    code.push(0xB2);
    code.extend(encode_zstring("a")); // 2 bytes
    code.push(0xB2);
    code.extend(encode_zstring("b"));
    code.push(0xBA);

    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "ab");
}

#[test]
fn branch_on_false_taken_when_condition_fails() {
    let mut code = vec![0x90, 0x01, 0x45]; // jz #1, sense=false: branch taken
    code.push(0xB2);
    code.extend(encode_zstring("a"));
    code.push(0xB2);
    code.extend(encode_zstring("b"));
    code.push(0xBA);

    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "b");
}

#[test]
fn branch_on_true_long_offset() {
    // jz #0 with sense=true and a two-byte branch descriptor. Offset 6
    // skips the 3-byte print plus quit that follow the descriptor.
    let mut code = vec![0x90, 0x00, 0x80, 0x06];
    code.push(0xB2);
    code.extend(encode_zstring("a"));
    code.push(0xBA);
    code.push(0xB2);
    code.extend(encode_zstring("b"));
    code.push(0xBA);

    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "b");
}

#[test]
fn jump_is_unconditional() {
    // jump over the first print; offset 5 = skip 3 bytes (target =
    // pc + 3 + offset - 2).
    let mut code = vec![0x8C, 0x00, 0x05];
    code.push(0xB2);
    code.extend(encode_zstring("a"));
    code.push(0xB2);
    code.extend(encode_zstring("b"));
    code.push(0xBA);

    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "b");
}

#[test]
fn je_matches_any_later_operand() {
    // je #5 #3 #5 (variable form): true, sense=true, so the branch skips
    // the first print.
    let mut code = vec![0xC1, 0b01_01_01_11, 5, 3, 5, 0xC5];
    code.push(0xB2);
    code.extend(encode_zstring("a"));
    code.push(0xB2);
    code.extend(encode_zstring("b"));
    code.push(0xBA);

    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "b");
}

#[test]
fn call_seeds_locals_and_returns_through_store_byte() {
    let mut builder = StoryBuilder::new();
    // Routine: two locals preset to 5 and 9; add L1 L2 -> stack; ret_popped.
    let routine = builder.add_routine(&[5, 9], &[0x74, 0x01, 0x02, 0x00, 0xB8]);
    let packed = StoryBuilder::packed(routine);

    // call routine #7 -> G0; print_num G0; quit. The argument overwrites
    // the first local, so the sum is 7 + 9.
    let code = vec![
        0xE0,
        0b00_01_11_11,
        (packed >> 8) as u8,
        (packed & 0xFF) as u8,
        0x07,
        0x10, // store byte
        0xE6,
        0xBF,
        0x10,
        0xBA,
    ];

    let host = TestHost::new();
    let output = host.output.clone();
    let mut machine = builder.main_code(&code).build_machine_with(host);
    machine.run().unwrap();
    assert_eq!(*output.borrow(), "16");
}

#[test]
fn call_to_address_zero_stores_false() {
    let code = vec![
        0xE0, 0b00_11_11_11, 0x00, 0x00, 0x10, // call 0 -> G0
        0xE6, 0xBF, 0x10, // print_num G0
        0xBA,
    ];
    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "0");
}

#[test]
fn branch_offsets_zero_and_one_return_from_routine() {
    // Two routines built around "jz #0 branch-on-true": descriptor 0xC0
    // returns false, 0xC1 returns true, and only because the branch is
    // taken.
    let mut builder = StoryBuilder::new();
    let ret_false = builder.add_routine(&[], &[0x90, 0x00, 0xC0]);
    let ret_true = builder.add_routine(&[], &[0x90, 0x00, 0xC1]);
    let pf = StoryBuilder::packed(ret_false);
    let pt = StoryBuilder::packed(ret_true);

    let code = vec![
        0xE0, 0b00_11_11_11, (pf >> 8) as u8, (pf & 0xFF) as u8, 0x10,
        0xE6, 0xBF, 0x10,
        0xE0, 0b00_11_11_11, (pt >> 8) as u8, (pt & 0xFF) as u8, 0x11,
        0xE6, 0xBF, 0x11,
        0xBA,
    ];

    let host = TestHost::new();
    let output = host.output.clone();
    let mut machine = builder.main_code(&code).build_machine_with(host);
    machine.run().unwrap();
    assert_eq!(*output.borrow(), "01");
}

#[test]
fn rtrue_and_rfalse_close_routines() {
    let mut builder = StoryBuilder::new();
    let r_true = builder.add_routine(&[], &[0xB0]);
    let r_false = builder.add_routine(&[], &[0xB1]);
    let pt = StoryBuilder::packed(r_true);
    let pf = StoryBuilder::packed(r_false);

    let code = vec![
        0xE0, 0b00_11_11_11, (pt >> 8) as u8, (pt & 0xFF) as u8, 0x10,
        0xE6, 0xBF, 0x10,
        0xE0, 0b00_11_11_11, (pf >> 8) as u8, (pf & 0xFF) as u8, 0x11,
        0xE6, 0xBF, 0x11,
        0xBA,
    ];

    let host = TestHost::new();
    let output = host.output.clone();
    let mut machine = builder.main_code(&code).build_machine_with(host);
    machine.run().unwrap();
    assert_eq!(*output.borrow(), "10");
}

#[test]
fn stack_opcodes() {
    // push #5; push #3; pull G0; print_num G0; print_num stack-pop; quit
    let code = vec![
        0xE8, 0x7F, 0x05,
        0xE8, 0x7F, 0x03,
        0xE9, 0x7F, 0x10,
        0xE6, 0xBF, 0x10,
        0xE6, 0xBF, 0x00,
        0xBA,
    ];
    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "35");
}

#[test]
fn load_of_variable_zero_peeks() {
    // push #9; load V0 -> G0; print_num G0; print_num stack-pop. If load
    // popped, the second print would see an empty stack.
    let code = vec![
        0xE8, 0x7F, 0x09,
        0x9E, 0x00, 0x10,
        0xE6, 0xBF, 0x10,
        0xE6, 0xBF, 0x00,
        0xBA,
    ];
    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "99");
}

#[test]
fn signed_sixteen_bit_wraparound() {
    // store G0 #0x7FFF (var-form store for the large constant); inc G0
    let code = vec![
        0xCD, 0b01_00_11_11, 0x10, 0x7F, 0xFF,
        0x95, 0x10,
        0xE6, 0xBF, 0x10,
        0xBA,
    ];
    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "-32768");
}

#[test]
fn signed_division_and_remainder() {
    // div #-7 #2 -> G0, mod #-7 #2 -> G1 (large constants via var form)
    let neg7 = (-7i16) as u16;
    let code = vec![
        0xD7, 0b00_01_11_11, (neg7 >> 8) as u8, (neg7 & 0xFF) as u8, 0x02, 0x10,
        0xE6, 0xBF, 0x10,
        0xB2, 0x80, 0xA5, // print " " (z-chars 0,5,5)
        0xD8, 0b00_01_11_11, (neg7 >> 8) as u8, (neg7 & 0xFF) as u8, 0x02, 0x11,
        0xE6, 0xBF, 0x11,
        0xBA,
    ];
    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "-3 -1");
}

#[test]
fn division_by_zero_traps() {
    let code = vec![0x17, 0x05, 0x00, 0x10, 0xBA]; // div #5 #0
    let mut machine = StoryBuilder::new().main_code(&code).build_machine();
    let err = machine.run().unwrap_err();
    assert!(err.contains("Division by zero"), "{err}");
    assert!(err.contains("Call stack"), "{err}");
}

#[test]
fn unimplemented_opcode_traps_with_name() {
    let code = vec![0x88, 0x00, 0x00]; // call_1s is a version-4 opcode
    let mut machine = StoryBuilder::new().main_code(&code).build_machine();
    let err = machine.run().unwrap_err();
    assert!(err.contains("call_1s") || err.contains("88"), "{err}");
}

#[test]
fn inc_chk_and_dec_chk_compare_signed() {
    // store G0 0; inc_chk G0 #0 -> branch: 1 > 0 so the branch (sense
    // true) is taken and "a" is skipped.
    let mut code = vec![
        0x0D, 0x10, 0x00,
        0x05, 0x10, 0x00, 0xC5, // inc_chk G0 #0, offset 5
    ];
    code.push(0xB2);
    code.extend(encode_zstring("a"));
    code.push(0xB2);
    code.extend(encode_zstring("b"));
    code.push(0xBA);
    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "b");
}

#[test]
fn print_char_and_not() {
    // print_char #72 'H'; print_char #105 'i'; not #0 -> G0; print_num
    let code = vec![
        0xE5, 0x7F, 72,
        0xE5, 0x7F, 105,
        0x8F, 0x00, 0x00, 0x10, // not #0 (large const) -> G0
        0xE6, 0xBF, 0x10,
        0xBA,
    ];
    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "Hi-1");
}

#[test]
fn loadw_loadb_storew_storeb() {
    use flathead::test_util::TEXT_BUFFER;
    let buf = TEXT_BUFFER;
    // storew BUF 0 #0x1234; storeb BUF 5 #0xAB; loadw BUF 0 -> G0;
    // loadb BUF 5 -> G1
    let code = vec![
        0xE1, 0b00_01_00_11, (buf >> 8) as u8, (buf & 0xFF) as u8, 0x00, 0x12, 0x34,
        0xE2, 0b00_01_01_11, (buf >> 8) as u8, (buf & 0xFF) as u8, 0x05, 0xAB,
        0xCF, 0b00_01_11_11, (buf >> 8) as u8, (buf & 0xFF) as u8, 0x00, 0x10,
        0xD0, 0b00_01_11_11, (buf >> 8) as u8, (buf & 0xFF) as u8, 0x05, 0x11,
        0xBA,
    ];
    let host = TestHost::new();
    let mut machine = StoryBuilder::new().main_code(&code).build_machine_with(host);
    machine.run().unwrap();
    assert_eq!(machine.read_word(buf as u32).unwrap(), 0x1234);
    assert_eq!(machine.read_byte(buf as u32 + 5).unwrap(), 0xAB);
    assert_eq!(machine.get_var(0x10).unwrap(), 0x1234);
    assert_eq!(machine.get_var(0x11).unwrap(), 0x00AB);
}

#[test]
fn storew_into_static_memory_traps() {
    use flathead::test_util::DICT_ADDR;
    let code = vec![
        0xE1, 0b00_01_00_11, (DICT_ADDR >> 8) as u8, (DICT_ADDR & 0xFF) as u8, 0x00, 0x00, 0x01,
        0xBA,
    ];
    let mut machine = StoryBuilder::new().main_code(&code).build_machine();
    let err = machine.run().unwrap_err();
    assert!(err.contains("read-only"), "{err}");
}

#[test]
fn random_draws_are_seeded_and_in_range() {
    // random #6 -> G0, eight times over
    let mut code = Vec::new();
    for i in 0..8u8 {
        code.extend_from_slice(&[0xE7, 0x7F, 0x06, 0x10 + i]);
    }
    code.push(0xBA);

    let mut m1 = StoryBuilder::new().main_code(&code).build_machine();
    m1.run().unwrap();
    let mut m2 = StoryBuilder::new().main_code(&code).build_machine();
    m2.run().unwrap();

    for var in 0x10..0x18u8 {
        let a = m1.get_var(var).unwrap();
        let b = m2.get_var(var).unwrap();
        assert!((1..=6).contains(&a), "draw {a} out of range");
        assert_eq!(a, b, "fresh machines share the default stream");
    }
}

#[test]
fn random_nonpositive_reseeds_and_stores_zero() {
    let neg = (-5i16) as u16;
    let code = vec![
        0xE7, 0b00_11_11_11, (neg >> 8) as u8, (neg & 0xFF) as u8, 0x10,
        0xE7, 0x7F, 0x06, 0x11,
        0xBA,
    ];
    let mut m1 = StoryBuilder::new().main_code(&code).build_machine();
    m1.run().unwrap();
    let mut m2 = StoryBuilder::new().main_code(&code).build_machine();
    m2.run().unwrap();
    assert_eq!(m1.get_var(0x10).unwrap(), 0);
    assert_eq!(m1.get_var(0x11).unwrap(), m2.get_var(0x11).unwrap());
}

#[test]
fn nop_and_pop_advance() {
    let code = vec![
        0xE8, 0x7F, 0x2A, // push #42
        0xB4,             // nop
        0xB9,             // pop
        0xB2, 0x94, 0xA5, // print ""
        0xBA,
    ];
    let (reason, _) = run_and_capture(&code);
    assert_eq!(reason, ExitReason::Quit);
}

#[test]
fn screen_opcodes_are_recognized_no_ops() {
    // split_window #1; set_window #0; output_stream #1; then print
    let mut code = vec![
        0xEA, 0x7F, 0x01,
        0xEB, 0x7F, 0x00,
        0xF3, 0x7F, 0x01,
    ];
    code.push(0xB2);
    code.extend(encode_zstring("ok"));
    code.push(0xBA);
    let (_, output) = run_and_capture(&code);
    assert_eq!(output, "ok");
}

#[test]
fn sound_effect_reaches_the_host() {
    let host = TestHost::new();
    let sounds = host.sounds.clone();
    let code = vec![
        0xF5, 0b01_01_01_11, 3, 2, 8, // sound_effect 3 2 8
        0xBA,
    ];
    let mut machine = StoryBuilder::new().main_code(&code).build_machine_with(host);
    machine.run().unwrap();
    assert_eq!(*sounds.borrow(), vec![(3, 2, 8)]);
}

#[test]
fn program_counter_advances_exactly_per_instruction() {
    // A straight-line program with one of each shape: store (3), add with
    // store byte (4), print inline (3), nop (1).
    let mut machine = story_with_code(&[
        0x0D, 0x10, 0x01, // store
        0x14, 0x01, 0x02, 0x10, // add #1 #2 -> G0
        0xB2, 0x94, 0xA5, // print ""
        0xB4, // nop
        0xBA,
    ]);
    let start = machine.pc;
    machine.run_with_limit(1).unwrap();
    assert_eq!(machine.pc, start + 3);
    machine.run_with_limit(1).unwrap();
    assert_eq!(machine.pc, start + 7);
    machine.run_with_limit(1).unwrap();
    assert_eq!(machine.pc, start + 10);
    machine.run_with_limit(1).unwrap();
    assert_eq!(machine.pc, start + 11);
}
