mod mock_test_code_patching;
mod mock_test_reloc_round_trip;
