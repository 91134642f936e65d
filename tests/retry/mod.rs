mod dead_letter;
