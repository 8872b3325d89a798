// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Region classifier properties across the configured layout.

use torque_common::memory::{MemoryMap, Region, Span, TARGET_MEMORY_MAP};
use torque_common::protocol::{
    AVAILABLE_FLASH_END, AVAILABLE_FLASH_START, BOOTLOADER_FLASH_END, BOOTLOADER_FLASH_START,
    JUMP_TABLE_END, JUMP_TABLE_START, PAGE_SIZE, RAM_END, RAM_START,
};

/// Reference classification straight from the interval definitions.
fn expected_region(addr: u32) -> Region {
    if (BOOTLOADER_FLASH_START..BOOTLOADER_FLASH_END).contains(&addr) {
        Region::BootloaderFlash
    } else if (JUMP_TABLE_START..JUMP_TABLE_END).contains(&addr) {
        Region::JumpTable
    } else if (AVAILABLE_FLASH_START..AVAILABLE_FLASH_END).contains(&addr) {
        Region::AvailableFlash
    } else if (RAM_START..RAM_END).contains(&addr) {
        Region::Ram
    } else {
        Region::Unknown
    }
}

#[test]
fn every_address_maps_to_exactly_one_region() {
    // Fuzz around every configured boundary plus the address-space extremes.
    let boundaries = [
        0x0000_0000,
        BOOTLOADER_FLASH_START,
        BOOTLOADER_FLASH_END,
        JUMP_TABLE_START,
        JUMP_TABLE_END,
        AVAILABLE_FLASH_START,
        AVAILABLE_FLASH_END,
        RAM_START,
        RAM_END,
        0xFFFF_FFFF,
    ];
    for &b in &boundaries {
        for delta in -4i64..=4 {
            let addr = (b as i64 + delta).clamp(0, u32::MAX as i64) as u32;
            assert_eq!(
                TARGET_MEMORY_MAP.classify(addr),
                expected_region(addr),
                "addr {addr:#010x}"
            );
        }
    }
}

#[test]
fn classification_is_idempotent() {
    for addr in (0x0800_0000u32..0x0804_0000).step_by(0x101) {
        let first = TARGET_MEMORY_MAP.classify(addr);
        assert_eq!(TARGET_MEMORY_MAP.classify(addr), first);
    }
}

#[test]
fn configured_intervals_never_overlap() {
    assert!(TARGET_MEMORY_MAP.is_coherent());
}

#[test]
fn overlapping_map_is_rejected() {
    let mut map = TARGET_MEMORY_MAP;
    map.jump_table = Span::new(BOOTLOADER_FLASH_END - PAGE_SIZE, BOOTLOADER_FLASH_END + PAGE_SIZE);
    assert!(!map.is_coherent());
}

#[test]
fn unaligned_available_flash_is_rejected() {
    let map = MemoryMap {
        available: Span::new(AVAILABLE_FLASH_START + 2, AVAILABLE_FLASH_END),
        ..TARGET_MEMORY_MAP
    };
    assert!(!map.is_coherent());
}

#[test]
fn jump_table_occupies_one_isolated_page() {
    assert_eq!(JUMP_TABLE_END - JUMP_TABLE_START, PAGE_SIZE);
    assert_eq!(JUMP_TABLE_START % PAGE_SIZE, 0);
    // The page is not part of AvailableFlash, so host data writes can never
    // reach it.
    assert_eq!(TARGET_MEMORY_MAP.classify(JUMP_TABLE_START), Region::JumpTable);
    assert_eq!(
        TARGET_MEMORY_MAP.classify(JUMP_TABLE_END - 1),
        Region::JumpTable
    );
}
