use super::*;
use crate::ports::PortIo;
use parse::ParseOutput;
use std::cell::RefCell;
use std::rc::Rc;
use tracing_test::traced_test;
use variables::{VariableContents, VariableTable};

const MEMORY_SIZE: u32 = 4096;
const LIMIT: u32 = MEMORY_BASE + MEMORY_SIZE;

fn load_with(emulator: &mut Emulator, source: &str, variables: &mut VariableTable) {
    let ParseOutput { instructions, .. } = emulator.parse_program(source, variables).unwrap();
    emulator.load_program(instructions);
    emulator.reset_memory();
    variables.fill(&mut emulator.memory);
    emulator.reset_registers();
}

fn load(source: &str) -> Emulator {
    let mut emulator = Emulator::new(MEMORY_SIZE).unwrap();
    load_with(&mut emulator, source, &mut VariableTable::new());
    emulator
}

fn run(source: &str) -> Emulator {
    let mut emulator = load(source);
    emulator.run(Some(10_000));
    emulator
}

/// Input completes only when the script has a value for it.
#[derive(Debug, Default)]
struct ScriptedPorts {
    inputs: Rc<RefCell<Vec<u32>>>,
}

impl PortIo for ScriptedPorts {
    fn input(&mut self, _port: u32, buffer: &mut [u8; 4], _size: u32) -> bool {
        match self.inputs.borrow_mut().pop() {
            Some(value) => {
                *buffer = value.to_le_bytes();
                true
            }
            None => false,
        }
    }

    fn output(&mut self, _port: u32, _buffer: &[u8; 4], _size: u32) -> bool {
        false
    }
}

#[traced_test]
#[test]
fn test_register_aliasing() {
    tracing::info_span!("test_register_aliasing").in_scope(|| {
        let mut emulator = Emulator::new(MEMORY_SIZE).unwrap();
        emulator.set_reg(Register::Eax, 0x1234_5678);
        assert_eq!(emulator.reg(Register::Al), 0x78);
        assert_eq!(emulator.reg(Register::Ah), 0x56);
        assert_eq!(emulator.reg(Register::Ax), 0x5678);

        emulator.set_reg(Register::Al, 0xAB);
        assert_eq!(emulator.reg(Register::Eax), 0x1234_56AB);
        emulator.set_reg(Register::Ah, 0x1CD);
        assert_eq!(emulator.reg(Register::Eax), 0x1234_CDAB);
        emulator.set_reg(Register::Ax, 0xFFFF_0000);
        assert_eq!(emulator.reg(Register::Eax), 0x1234_0000);
    });
}

#[traced_test]
#[test]
fn test_memory_bounds() {
    tracing::info_span!("test_memory_bounds").in_scope(|| {
        let mut emulator = Emulator::new(MEMORY_SIZE).unwrap();
        assert_eq!(
            emulator.read_mem(1023, 1),
            Err(RuntimeError::InvalidReadAddress(1023))
        );
        assert_eq!(emulator.read_mem(1024, 1), Ok(0));
        assert_eq!(emulator.read_mem(LIMIT - 4, 4), Ok(0));
        assert_eq!(
            emulator.read_mem(LIMIT - 3, 4),
            Err(RuntimeError::InvalidReadAddress(LIMIT - 3))
        );
        assert_eq!(
            emulator.write_mem(LIMIT, 1, 1),
            Err(RuntimeError::InvalidWriteAddress(LIMIT))
        );
        assert_eq!(
            emulator.read_mem(1024, 3),
            Err(RuntimeError::InvalidReadSize(3))
        );

        emulator.write_mem(1024, 0x1122_3344, 4).unwrap();
        assert_eq!(emulator.read_mem(1024, 1), Ok(0x44));
        assert_eq!(emulator.read_mem(1026, 2), Ok(0x1122));
        assert_eq!(emulator.memory.debug_read_dword(1024), Some(0x1122_3344));
        assert_eq!(emulator.memory.debug_read_byte(1023), None);
    });
}

#[traced_test]
#[test]
fn test_addition_and_subtraction_flags() {
    tracing::info_span!("test_addition_and_subtraction_flags").in_scope(|| {
        let emulator = run("mov eax, 0x7FFFFFFF\nadd eax, 1\nhlt");
        let flags = emulator.flags;
        assert_eq!(emulator.reg(Register::Eax), 0x8000_0000);
        assert!(flags.overflow && flags.sign && !flags.carry && !flags.zero);

        let emulator = run("mov eax, 0\nsub eax, 1\nhlt");
        let flags = emulator.flags;
        assert_eq!(emulator.reg(Register::Eax), u32::MAX);
        assert!(flags.carry && flags.sign && !flags.overflow && !flags.zero);

        let emulator = run("mov eax, 0xFFFFFFFF\nadd eax, 1\nhlt");
        let flags = emulator.flags;
        assert_eq!(emulator.reg(Register::Eax), 0);
        assert!(flags.carry && flags.zero && !flags.overflow && !flags.sign);

        // 8 bit arithmetic only touches al
        let emulator = run("mov eax, 0x1FF\nadd al, 1\nadc ah, 0\nhlt");
        assert_eq!(emulator.reg(Register::Eax), 0x200);
    });
}

#[traced_test]
#[test]
fn test_end_to_end_steps() {
    tracing::info_span!("test_end_to_end_steps").in_scope(|| {
        let mut emulator = load("mov eax, 5\nadd eax, 3");
        assert!(emulator.step(false));
        assert!(emulator.step(false));
        assert_eq!(emulator.reg(Register::Eax), 8);
        let flags = emulator.flags;
        assert!(!flags.zero && !flags.sign && !flags.carry && !flags.overflow);
        assert_eq!(emulator.eip(), LIMIT + 8);

        assert!(!emulator.step(false));
        assert_eq!(
            emulator.error,
            Some(RuntimeError::InvalidInstructionAddress(LIMIT + 8))
        );
        assert_eq!(
            emulator.take_faults(),
            vec![RuntimeError::InvalidInstructionAddress(LIMIT + 8)]
        );
        assert!(emulator.take_faults().is_empty());
    });
}

#[traced_test]
#[test]
fn test_division_errors_leave_registers() {
    tracing::info_span!("test_division_errors_leave_registers").in_scope(|| {
        let emulator = run("mov eax, 10\nmov edx, 3\nmov ebx, 0\ndiv ebx\nhlt");
        assert_eq!(emulator.error, Some(RuntimeError::DivisionByZero));
        assert_eq!(emulator.reg(Register::Eax), 10);
        assert_eq!(emulator.reg(Register::Edx), 3);
        assert_eq!(emulator.eip(), LIMIT + 12);

        let emulator = run("mov edx, 1\nmov eax, 0\nmov ebx, 1\ndiv ebx\nhlt");
        assert_eq!(emulator.error, Some(RuntimeError::DivisionOverflow));
        assert_eq!(emulator.reg(Register::Edx), 1);

        let emulator = run("mov ax, 0x100\nmov bl, 1\ndiv bl\nhlt");
        assert_eq!(emulator.error, Some(RuntimeError::DivisionOverflow));
    });
}

#[traced_test]
#[test]
fn test_multiply_and_divide() {
    tracing::info_span!("test_multiply_and_divide").in_scope(|| {
        let emulator = run("mov eax, 0x10000\nmov ebx, 0x10000\nmul ebx\nhlt");
        assert_eq!(emulator.reg(Register::Eax), 0);
        assert_eq!(emulator.reg(Register::Edx), 1);
        assert!(emulator.flags.carry && emulator.flags.overflow);

        let emulator = run("mov eax, -7\nmov ebx, 2\ncdq\nidiv ebx\nhlt");
        assert_eq!(emulator.reg(Register::Eax) as i32, -3);
        assert_eq!(emulator.reg(Register::Edx) as i32, -1);

        let emulator = run("mov al, -3\nmov bl, 5\nimul bl\nhlt");
        assert_eq!(emulator.reg(Register::Ax) as u16 as i16, -15);
        assert!(!emulator.flags.carry);

        let emulator = run("mov eax, 100\nmov edx, 0\nmov ecx, 7\ndiv ecx\nhlt");
        assert_eq!(emulator.reg(Register::Eax), 14);
        assert_eq!(emulator.reg(Register::Edx), 2);
    });
}

#[traced_test]
#[test]
fn test_forward_label_jump() {
    tracing::info_span!("test_forward_label_jump").in_scope(|| {
        let emulator = run("jmp skip\nmov eax, 1\nskip: mov ebx, 2\nhlt");
        assert_eq!(emulator.reg(Register::Eax), 0);
        assert_eq!(emulator.reg(Register::Ebx), 2);
        assert!(emulator.halted);
    });
}

#[traced_test]
#[test]
fn test_loops_and_conditions() {
    tracing::info_span!("test_loops_and_conditions").in_scope(|| {
        let emulator = run("mov ecx, 10\nmov eax, 0\nsum: add eax, ecx\nloop sum\nhlt");
        assert_eq!(emulator.reg(Register::Eax), 55);
        assert_eq!(emulator.reg(Register::Ecx), 0);

        let source = "
            mov eax, -5
            cmp eax, 3
            jl less
            mov ebx, 1
            hlt
        less:
            mov ebx, 2
            cmp eax, 3
            jb below
            hlt
        below:
            mov ecx, 1
            hlt
        ";
        let emulator = run(source);
        // signed -5 < 3 but unsigned 0xFFFFFFFB is not below 3
        assert_eq!(emulator.reg(Register::Ebx), 2);
        assert_eq!(emulator.reg(Register::Ecx), 0);

        let emulator = run("mov eax, 4\ncmp eax, 4\nsete bl\nsetne bh\nmov ecx, 9\ncmovz edx, ecx\nhlt");
        assert_eq!(emulator.reg(Register::Bl), 1);
        assert_eq!(emulator.reg(Register::Bh), 0);
        assert_eq!(emulator.reg(Register::Edx), 9);
    });
}

#[traced_test]
#[test]
fn test_stack_and_calls() {
    tracing::info_span!("test_stack_and_calls").in_scope(|| {
        let source = "
            mov eax, 5
            push eax
            pop ebx
            call double
            hlt
        double:
            add ebx, ebx
            ret
        ";
        let emulator = run(source);
        assert_eq!(emulator.reg(Register::Ebx), 10);
        assert_eq!(emulator.reg(Register::Esp), LIMIT);

        let emulator = run("mov eax, 1\nmov esi, 2\npushad\nmov eax, 9\nmov esi, 9\npopad\nhlt");
        assert_eq!(emulator.reg(Register::Eax), 1);
        assert_eq!(emulator.reg(Register::Esi), 2);
        assert_eq!(emulator.reg(Register::Esp), LIMIT);

        let emulator = run("stc\npushfd\nclc\npopfd\nhlt");
        assert!(emulator.flags.carry);
        assert_eq!(emulator.reg(Register::Esp), LIMIT);
    });
}

#[traced_test]
#[test]
fn test_stack_overflow_faults() {
    tracing::info_span!("test_stack_overflow_faults").in_scope(|| {
        let emulator = run("pop eax\nhlt");
        assert_eq!(emulator.error, Some(RuntimeError::InvalidReadAddress(LIMIT)));
        assert_eq!(emulator.reg(Register::Esp), LIMIT);

        let emulator = run("mov esp, 1024\npush eax\nhlt");
        assert_eq!(emulator.error, Some(RuntimeError::InvalidWriteAddress(1020)));
        assert_eq!(emulator.reg(Register::Esp), 1024);
    });
}

#[traced_test]
#[test]
fn test_rep_stosb() {
    tracing::info_span!("test_rep_stosb").in_scope(|| {
        let source = "mov edi, 1024\nmov ecx, 3\nmov al, 0x5A\nrep stosb\nhlt";
        let emulator = run(source);
        assert_eq!(emulator.reg(Register::Ecx), 0);
        assert_eq!(emulator.reg(Register::Edi), 1027);
        assert_eq!(emulator.memory.slice(1024, 4), Some(&[0x5A, 0x5A, 0x5A, 0][..]));
        assert!(emulator.halted);

        let emulator = run("mov edi, 1024\nmov ecx, 0\nmov al, 0x5A\nrep stosb\nhlt");
        assert_eq!(emulator.reg(Register::Edi), 1024);
        assert_eq!(emulator.read_mem(1024, 1), Ok(0));
        assert!(emulator.halted);
    });
}

#[traced_test]
#[test]
fn test_string_copy_with_variables() {
    tracing::info_span!("test_string_copy_with_variables").in_scope(|| {
        let mut emulator = Emulator::new(MEMORY_SIZE).unwrap();
        let mut variables = VariableTable::new();
        variables
            .add(
                "src",
                0,
                Some(VariableContents::Bytes(vec![1, 2, 3, 4, 5, 6, 7, 8])),
                false,
                MEMORY_SIZE,
            )
            .unwrap();
        variables.add("dst", 8, None, true, MEMORY_SIZE).unwrap();
        let source = "
            lea esi, [src]
            lea edi, [dst]
            mov ecx, 8
            rep movsb
            lea esi, [dst + 4]
            lodsd
            hlt
        ";
        load_with(&mut emulator, source, &mut variables);
        emulator.run(Some(100));
        assert!(emulator.halted);

        let dst = variables.get("dst").unwrap().address;
        assert_eq!(
            emulator.memory.slice(dst, 8),
            Some(&[1, 2, 3, 4, 5, 6, 7, 8][..])
        );
        assert_eq!(emulator.reg(Register::Eax), 0x0807_0605);
    });
}

#[traced_test]
#[test]
fn test_pending_input_resumes() {
    tracing::info_span!("test_pending_input_resumes").in_scope(|| {
        let mut emulator =
            Emulator::with_ports(MEMORY_SIZE, Box::new(ScriptedPorts::default())).unwrap();
        load_with(
            &mut emulator,
            "mov dx, 7\nin al, dx\nmov bl, al\nhlt",
            &mut VariableTable::new(),
        );
        emulator.run(None);
        assert_eq!(
            emulator.pending_io,
            Some(PendingIo::In {
                target: Register::Al,
                size: 1
            })
        );
        assert!(!emulator.halted);
        assert_eq!(emulator.eip(), LIMIT + 8);

        emulator.io_buffer = [0x2A, 0, 0, 0];
        assert_eq!(emulator.resume_from_io(), Ok(true));
        assert_eq!(emulator.pending_io, None);
        assert_eq!(emulator.resume_from_io(), Ok(false));
        emulator.run(None);
        assert_eq!(emulator.reg(Register::Bl), 0x2A);
        assert!(emulator.halted);
    });
}

#[traced_test]
#[test]
fn test_pending_string_transfers_move_pointers() {
    tracing::info_span!("test_pending_string_transfers_move_pointers").in_scope(|| {
        let ports = ScriptedPorts::default();
        ports.inputs.borrow_mut().push(0x11);
        let mut emulator = Emulator::with_ports(MEMORY_SIZE, Box::new(ports)).unwrap();
        load_with(
            &mut emulator,
            "mov edi, 1024\ninsb\ninsb\nmov esi, 1024\noutsw\nhlt",
            &mut VariableTable::new(),
        );

        // the first insb is served by the script, the second waits
        emulator.run(None);
        assert_eq!(emulator.pending_io, Some(PendingIo::InString { size: 1 }));
        assert_eq!(emulator.reg(Register::Edi), 1025);
        emulator.io_buffer = [0x22, 0, 0, 0];
        emulator.resume_from_io().unwrap();
        assert_eq!(emulator.reg(Register::Edi), 1026);
        assert_eq!(emulator.read_mem(1024, 2), Ok(0x2211));

        // output is always refused
        emulator.run(None);
        assert_eq!(
            emulator.pending_io,
            Some(PendingIo::Out {
                pointer: Some(Register::Esi),
                size: 2
            })
        );
        assert_eq!(emulator.io_buffer, [0x11, 0x22, 0, 0]);
        assert_eq!(emulator.reg(Register::Esi), 1024);
        emulator.resume_from_io().unwrap();
        assert_eq!(emulator.reg(Register::Esi), 1026);
    });
}

#[traced_test]
#[test]
fn test_interrupt_priority() {
    tracing::info_span!("test_interrupt_priority").in_scope(|| {
        let source = "
            mov eax, 2048
            lidt eax
            mov ebx, first
            mov [eax + 132], ebx
            mov ebx, second
            mov [eax + 160], ebx
            sti
            hlt
            hlt
        first:
            inc esi
            mov ecx, esi
            iret
        second:
            inc esi
            mov edx, esi
            iret
        ";
        let mut emulator = load(source);
        emulator.run(None);
        assert!(emulator.halted);

        assert!(emulator.queue_interrupt(40));
        assert!(emulator.queue_interrupt(33));
        assert!(emulator.queue_interrupt(40));
        assert!(!emulator.queue_interrupt(31));
        assert_eq!(emulator.pending_interrupts(), &[40, 33]);
        assert!(!emulator.halted);

        emulator.run(Some(100));
        assert!(emulator.halted);
        // 33 ran first
        assert_eq!(emulator.reg(Register::Ecx), 1);
        assert_eq!(emulator.reg(Register::Edx), 2);
        assert_eq!(emulator.reg(Register::Esp), LIMIT);
        assert!(emulator.pending_interrupts().is_empty());
    });
}

#[traced_test]
#[test]
fn test_interrupts_wait_for_the_flag() {
    tracing::info_span!("test_interrupts_wait_for_the_flag").in_scope(|| {
        let mut emulator = load("nop\nnop\nhlt");
        emulator.queue_interrupt(50);
        emulator.run(None);
        assert!(emulator.halted);
        assert_eq!(emulator.pending_interrupts(), &[50]);
    });
}

#[traced_test]
#[test]
fn test_software_interrupt_and_breakpoint() {
    tracing::info_span!("test_software_interrupt_and_breakpoint").in_scope(|| {
        let source = "
            mov eax, 2048
            lidt eax
            mov ebx, handler
            mov [eax + 256], ebx
            int 64
            int 3
            hlt
        handler:
            mov edi, 3
            iret
        ";
        let mut emulator = load(source);
        emulator.run(None);
        assert_eq!(emulator.reg(Register::Edi), 3);
        assert!(emulator.halted);
        assert!(emulator.debug_request);
        assert_eq!(emulator.eip(), LIMIT + 24);
    });
}

#[traced_test]
#[test]
fn test_shifts_and_rotates() {
    tracing::info_span!("test_shifts_and_rotates").in_scope(|| {
        let emulator = run("mov eax, 0x80000001\nshl eax, 1\nhlt");
        assert_eq!(emulator.reg(Register::Eax), 2);
        assert!(emulator.flags.carry);

        let emulator = run("mov eax, -16\nsar eax, 2\nmov ebx, -16\nshr ebx, 28\nhlt");
        assert_eq!(emulator.reg(Register::Eax) as i32, -4);
        assert_eq!(emulator.reg(Register::Ebx), 0xF);

        let emulator = run("mov al, 0x81\nrol al, 1\nmov bl, 0x81\nror bl, 1\nhlt");
        assert_eq!(emulator.reg(Register::Al), 0x03);
        assert_eq!(emulator.reg(Register::Bl), 0xC0);

        // rotate counts wrap at the operand width, or width + 1 through carry
        let emulator = run("mov al, 0x81\nrol al, 9\nmov bl, 0x81\nror bl, 10\nhlt");
        assert_eq!(emulator.reg(Register::Al), 0x03);
        assert_eq!(emulator.reg(Register::Bl), 0x60);
        assert!(!emulator.flags.carry);
        let emulator = run("mov al, 0x81\nclc\nrcl al, 9\nhlt");
        assert_eq!(emulator.reg(Register::Al), 0x81);
        assert!(!emulator.flags.carry);
        let emulator = run("mov al, 0x81\nclc\nrcl al, 10\nhlt");
        assert_eq!(emulator.reg(Register::Al), 0x02);
        assert!(emulator.flags.carry);

        let emulator = run("mov cl, 0\nmov eax, 5\nstc\nshl eax, cl\nhlt");
        assert_eq!(emulator.reg(Register::Eax), 5);
        assert!(emulator.flags.carry);
    });
}

#[traced_test]
#[test]
fn test_bit_and_data_operators() {
    tracing::info_span!("test_bit_and_data_operators").in_scope(|| {
        let emulator = run("mov eax, 0x12345678\nbswap eax\nhlt");
        assert_eq!(emulator.reg(Register::Eax), 0x7856_3412);

        let emulator = run("mov eax, 0x50\nbsf ebx, eax\nbsr ecx, eax\nbts eax, 0\nhlt");
        assert_eq!(emulator.reg(Register::Ebx), 4);
        assert_eq!(emulator.reg(Register::Ecx), 6);
        assert_eq!(emulator.reg(Register::Eax), 0x51);
        assert!(!emulator.flags.carry);

        let emulator = run("mov bl, -2\nmovzx eax, bl\nmovsx ecx, bl\nhlt");
        assert_eq!(emulator.reg(Register::Eax), 0xFE);
        assert_eq!(emulator.reg(Register::Ecx), 0xFFFF_FFFE);

        let emulator = run("mov eax, 1\nmov ebx, 2\nxchg eax, ebx\nxadd eax, ebx\nhlt");
        assert_eq!(emulator.reg(Register::Eax), 3);
        assert_eq!(emulator.reg(Register::Ebx), 2);

        let emulator = run("mov eax, 7\nmov ebx, 7\nmov ecx, 9\ncmpxchg ebx, ecx\nhlt");
        assert_eq!(emulator.reg(Register::Ebx), 9);
        assert!(emulator.flags.zero);

        let emulator = run("mov ebx, 1024\nmov ecx, 3\nlea eax, [ebx + ecx*4 + 8]\nhlt");
        assert_eq!(emulator.reg(Register::Eax), 1044);
    });
}

#[traced_test]
#[test]
fn test_xsave_round_trip_through_memory() {
    tracing::info_span!("test_xsave_round_trip_through_memory").in_scope(|| {
        let source = "
            mov eax, 1
            mov ebx, 2
            stc
            xsave [1024]
            mov eax, 0
            mov ebx, 0
            clc
            xrstor [1024]
            hlt
        ";
        let emulator = run(source);
        assert_eq!(emulator.read_mem(1024, 4), Ok(1));
        assert_eq!(emulator.read_mem(1028, 4), Ok(2));
        assert_eq!(emulator.reg(Register::Eax), 1);
        assert_eq!(emulator.reg(Register::Ebx), 2);
        assert!(emulator.flags.carry);
    });
}

#[traced_test]
#[test]
fn test_run_respects_max_steps() {
    tracing::info_span!("test_run_respects_max_steps").in_scope(|| {
        let mut emulator = load("spin: inc eax\njmp spin");
        assert_eq!(emulator.run(Some(10)), 10);
        assert_eq!(emulator.reg(Register::Eax), 5);
        assert!(!emulator.halted);
        assert!(emulator.error.is_none());
    });
}

#[traced_test]
#[test]
fn test_reset_execution_rewinds() {
    tracing::info_span!("test_reset_execution_rewinds").in_scope(|| {
        let mut emulator = run("mov eax, 3\nmov [1024], eax\nhlt");
        assert!(emulator.halted);
        emulator.reset_execution();
        emulator.reset_memory();
        emulator.reset_registers();
        assert!(!emulator.halted);
        assert_eq!(emulator.eip(), LIMIT);
        assert_eq!(emulator.reg(Register::Esp), LIMIT);
        assert_eq!(emulator.reg(Register::Eax), 0);
        assert_eq!(emulator.read_mem(1024, 4), Ok(0));
        assert_eq!(emulator.instructions().len(), 3);
    });
}
