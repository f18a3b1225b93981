//! Fuzz target for the container decoders.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tickwire_codec::{
    DecodeIterator,
    element_list::ElementList,
    field_list::FieldList,
    map::Map,
    series::Series,
    vector::Vector,
};

fn walk_field_list(data: &[u8]) {
    let mut iter = DecodeIterator::new(data, (14, 1));
    if let Ok((_, mut reader)) = FieldList::decode(&mut iter, None) {
        while let Ok(Some(_)) = reader.next_entry() {}
    }
}

fuzz_target!(|data: &[u8]| {
    walk_field_list(data);

    let mut iter = DecodeIterator::new(data, (14, 1));
    if let Ok((_, mut reader)) = ElementList::decode(&mut iter, None) {
        while let Ok(Some(_)) = reader.next_entry() {}
    }

    let mut iter = DecodeIterator::new(data, (14, 1));
    if let Ok((_, mut reader)) = Map::decode(&mut iter) {
        while let Ok(Some(entry)) = reader.next_entry() {
            walk_field_list(entry.payload);
        }
    }

    let mut iter = DecodeIterator::new(data, (14, 1));
    if let Ok((_, mut reader)) = Vector::decode(&mut iter) {
        while let Ok(Some(_)) = reader.next_entry() {}
    }

    let mut iter = DecodeIterator::new(data, (14, 1));
    if let Ok((_, mut reader)) = Series::decode(&mut iter) {
        while let Ok(Some(_)) = reader.next_entry() {}
    }
});
