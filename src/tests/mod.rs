mod code_item_tests;
mod codec_tests;
mod ins_list_tests;
