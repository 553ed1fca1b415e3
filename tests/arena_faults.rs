//! Ghost arena lifecycle test.
//!
//! The arena's fault handler and reservation are process-global, so the
//! whole lifecycle runs as one test in this dedicated binary: header
//! bootstrap, deep-offset faulting, byte persistence and the record append
//! round trip, in order, against pristine counters.

use specter::arena::{GhostArena, HEADER_SIZE};
use specter::pipeline::{append_record, read_record, RECORD_SIZE, VECTOR_DIM};
use specter::{RuntimeError, GHOST_MAGIC};

const ARENA_SIZE: usize = 1 << 40; // 1 TiB reservation

#[test]
fn ghost_arena_lifecycle() {
    let arena = GhostArena::init(ARENA_SIZE).expect("arena reservation failed");
    assert_eq!(arena.size(), ARENA_SIZE);

    // --- Header bootstrap -------------------------------------------------
    // init() already read the magic (the deliberate first fault) and wrote
    // the header into the freshly committed page.
    let header = arena.base() as *const u64;
    let magic = unsafe { std::ptr::read_volatile(header) };
    assert_eq!(magic, GHOST_MAGIC);
    assert_eq!(arena.vector_count(), 0);
    assert_eq!(arena.head_offset(), HEADER_SIZE as u64);
    assert!(
        arena.fault_count() >= 1,
        "bootstrap must have taken the first fault"
    );
    assert!(arena.resident_pages() >= 1);

    // --- Deep-offset fault ------------------------------------------------
    // Touching a byte half a terabyte in must commit exactly one new page.
    let faults_before = arena.fault_count();
    let resident_before = arena.resident_pages();

    let deep = 512u64 << 30;
    let addr = arena.address_of(deep).expect("offset inside reservation") as *mut u32;
    unsafe {
        std::ptr::write_volatile(addr, 0x1234);
        assert_eq!(std::ptr::read_volatile(addr), 0x1234);
    }
    assert_eq!(arena.fault_count(), faults_before + 1);
    assert_eq!(arena.resident_pages(), resident_before + 1);

    // A second access to the committed page takes no further fault and
    // returns the last value written.
    unsafe {
        std::ptr::write_volatile(addr, 0xBEEF);
        assert_eq!(std::ptr::read_volatile(addr), 0xBEEF);
    }
    assert_eq!(arena.fault_count(), faults_before + 1);

    // --- Offset translation bounds ----------------------------------------
    assert!(arena.address_of(ARENA_SIZE as u64 - 1).is_ok());
    assert_eq!(
        arena.address_of(ARENA_SIZE as u64).err(),
        Some(RuntimeError::InvalidAccess)
    );
    assert_eq!(
        arena.address_of(u64::MAX).err(),
        Some(RuntimeError::InvalidAccess)
    );

    // --- Record append round trip ------------------------------------------
    let mut lanes = [0i8; VECTOR_DIM];
    for (i, lane) in lanes.iter_mut().enumerate() {
        *lane = (i as i32 % 251 - 125) as i8;
    }

    let head_before = arena.head_offset();
    let count_before = arena.vector_count();
    let offset = append_record(arena, 0.125, -3.5, &lanes).expect("append");
    assert_eq!(offset, head_before);
    assert_eq!(arena.head_offset(), head_before + RECORD_SIZE as u64);
    assert_eq!(arena.vector_count(), count_before + 1);

    let (scale, bias, read_lanes) = read_record(arena, offset).expect("read back");
    assert_eq!(scale, 0.125);
    assert_eq!(bias, -3.5);
    assert_eq!(read_lanes, lanes, "record bytes must round-trip identically");

    // Appends advance the head monotonically.
    let second = append_record(arena, 1.0, 0.0, &lanes).expect("second append");
    assert_eq!(second, offset + RECORD_SIZE as u64);
    assert_eq!(arena.vector_count(), count_before + 2);

    // --- Idempotent init ----------------------------------------------------
    let again = GhostArena::init(ARENA_SIZE).expect("re-init");
    assert!(std::ptr::eq(arena, again));
    assert_eq!(again.vector_count(), count_before + 2);
}
