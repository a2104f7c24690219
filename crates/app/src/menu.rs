//! Interactive text menu.
//!
//! Reads one choice per line, runs the matching operation, prints the
//! outcome, and loops until "Exit" or end of input. Failures are reported
//! on the output and never end the session.

use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

use libris_catalog::{Book, Member};
use libris_circulation::{
    Circulation, CirculationError, Entity, StoreBorrowLedger, StoreInventoryLedger,
};
use libris_core::{BookId, MemberId};
use libris_store::StoreGateway;

use crate::services::{BorrowDetail, CatalogService, ReportService, ServiceError};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MenuChoice {
    AddMember,
    AvailableBooks,
    SearchBooks,
    BorrowDetails,
    DeleteUnborrowedBooks,
    DeleteInactiveMembers,
    UpdateBookStock,
    UpdateMemberEmail,
    BorrowBook,
    ReturnBook,
    TopBooks,
    OverdueBooks,
    MembersWithBorrowedBooks,
    Exit,
}

impl MenuChoice {
    pub const ALL: [MenuChoice; 14] = [
        MenuChoice::AddMember,
        MenuChoice::AvailableBooks,
        MenuChoice::SearchBooks,
        MenuChoice::BorrowDetails,
        MenuChoice::DeleteUnborrowedBooks,
        MenuChoice::DeleteInactiveMembers,
        MenuChoice::UpdateBookStock,
        MenuChoice::UpdateMemberEmail,
        MenuChoice::BorrowBook,
        MenuChoice::ReturnBook,
        MenuChoice::TopBooks,
        MenuChoice::OverdueBooks,
        MenuChoice::MembersWithBorrowedBooks,
        MenuChoice::Exit,
    ];

    /// Parse a 1-based menu number.
    pub fn parse(input: &str) -> Option<Self> {
        let n: usize = input.trim().parse().ok()?;
        Self::ALL.get(n.checked_sub(1)?).copied()
    }

    pub fn title(self) -> &'static str {
        match self {
            MenuChoice::AddMember => "Add Member",
            MenuChoice::AvailableBooks => "Available Books",
            MenuChoice::SearchBooks => "Search Books",
            MenuChoice::BorrowDetails => "Borrow Details",
            MenuChoice::DeleteUnborrowedBooks => "Delete Unborrowed Books",
            MenuChoice::DeleteInactiveMembers => "Delete Inactive Members",
            MenuChoice::UpdateBookStock => "Update Book Stock",
            MenuChoice::UpdateMemberEmail => "Update Member Email",
            MenuChoice::BorrowBook => "Borrow Book",
            MenuChoice::ReturnBook => "Return Book",
            MenuChoice::TopBooks => "Top 5 Borrowed Books",
            MenuChoice::OverdueBooks => "Overdue Books",
            MenuChoice::MembersWithBorrowedBooks => "Members with Borrowed Books",
            MenuChoice::Exit => "Exit",
        }
    }
}

fn format_book(book: &Book) -> String {
    format!(
        "#{} {} by {} [{}] stock: {}",
        book.book_id, book.title, book.author, book.category, book.stock
    )
}

fn format_member(member: &Member) -> String {
    format!("#{} {} <{}>", member.member_id, member.name, member.email)
}

fn format_detail(detail: &BorrowDetail) -> String {
    format!(
        "book #{} borrowed by member #{} on {}",
        detail.book_id,
        detail.member_id,
        detail.borrow_date.format("%Y-%m-%d %H:%M")
    )
}

fn borrow_failure(err: &CirculationError) -> String {
    match err {
        CirculationError::NotFound {
            entity: Entity::Book,
            ..
        } => "Book not found.".to_string(),
        CirculationError::NotFound {
            entity: Entity::Member,
            ..
        } => "Member not found.".to_string(),
        CirculationError::OutOfStock(_) => "Book not available.".to_string(),
        CirculationError::AlreadyBorrowed { .. } => {
            "Member already has this book on loan.".to_string()
        }
        CirculationError::StockUpdateFailed(_) => "Failed to update stock.".to_string(),
        CirculationError::RecordCreationFailed { .. } => {
            "Failed to create borrow record. Rolled back stock.".to_string()
        }
        other => format!("Transaction failed: {other}"),
    }
}

fn return_failure(err: &CirculationError) -> String {
    match err {
        CirculationError::NotFound {
            entity: Entity::Book,
            ..
        } => "Book not found.".to_string(),
        CirculationError::NoActiveBorrow { .. } => "No active borrow record found.".to_string(),
        CirculationError::StockUpdateFailed(_) => {
            "Failed to update stock. Rolled back borrow record.".to_string()
        }
        other => format!("Transaction failed: {other}"),
    }
}

/// One interactive session over a store gateway.
pub struct Menu<G, R, W> {
    catalog: CatalogService<G>,
    reports: ReportService<G>,
    circulation: Circulation<StoreInventoryLedger<G>, StoreBorrowLedger<G>>,
    input: R,
    output: W,
    closed: bool,
}

impl<G, R, W> Menu<G, R, W>
where
    G: StoreGateway + Clone,
    R: BufRead,
    W: Write,
{
    pub fn new(gateway: G, input: R, output: W) -> Self {
        Self {
            catalog: CatalogService::new(gateway.clone()),
            reports: ReportService::new(gateway.clone()),
            circulation: Circulation::over_store(gateway),
            input,
            output,
            closed: false,
        }
    }

    /// Give back the output sink, e.g. to inspect a captured session.
    pub fn into_output(self) -> W {
        self.output
    }

    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.print_menu()?;
            let Some(line) = self.read_line("\nEnter your choice (1-14): ")? else {
                break;
            };

            match MenuChoice::parse(&line) {
                Some(MenuChoice::Exit) => break,
                Some(choice) => {
                    writeln!(self.output, "\n--- {} ---\n", choice.title())?;
                    self.dispatch(choice)?;
                    if self.closed {
                        break;
                    }
                    writeln!(self.output, "\n--- End of {} ---\n", choice.title())?;
                }
                None => {
                    tracing::debug!(input = %line.trim(), "invalid menu choice");
                    writeln!(self.output, "\nInvalid choice. Please try again.\n")?;
                }
            }
        }
        writeln!(self.output, "\nExiting...\n")?;
        self.output.flush()
    }

    fn print_menu(&mut self) -> io::Result<()> {
        writeln!(self.output, "\n=== LIBRARY MANAGEMENT SYSTEM ===\n")?;
        for (i, choice) in MenuChoice::ALL.iter().enumerate() {
            writeln!(self.output, "{}. {}", i + 1, choice.title())?;
        }
        Ok(())
    }

    /// Prompt and read one line. `None` means input is exhausted.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            self.closed = true;
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Prompt for a typed value. `None` abandons the current operation.
    fn ask<T>(&mut self, prompt: &str) -> io::Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(line) = self.read_line(prompt)? else {
            return Ok(None);
        };
        match line.trim().parse() {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                writeln!(self.output, "Invalid input: {err}")?;
                Ok(None)
            }
        }
    }

    fn report_error(&mut self, err: &ServiceError) -> io::Result<()> {
        tracing::warn!(error = %err, "operation failed");
        writeln!(self.output, "Error: {err}")
    }

    fn dispatch(&mut self, choice: MenuChoice) -> io::Result<()> {
        match choice {
            MenuChoice::AddMember => self.add_member(),
            MenuChoice::AvailableBooks => self.available_books(),
            MenuChoice::SearchBooks => self.search_books(),
            MenuChoice::BorrowDetails => self.borrow_details(),
            MenuChoice::DeleteUnborrowedBooks => self.delete_unborrowed_books(),
            MenuChoice::DeleteInactiveMembers => self.delete_inactive_members(),
            MenuChoice::UpdateBookStock => self.update_stock(),
            MenuChoice::UpdateMemberEmail => self.update_email(),
            MenuChoice::BorrowBook => self.borrow_book(),
            MenuChoice::ReturnBook => self.return_book(),
            MenuChoice::TopBooks => self.top_books(),
            MenuChoice::OverdueBooks => self.overdue_books(),
            MenuChoice::MembersWithBorrowedBooks => self.member_totals(),
            MenuChoice::Exit => Ok(()),
        }
    }

    fn add_member(&mut self) -> io::Result<()> {
        let Some(name) = self.read_line("Enter member name: ")? else {
            return Ok(());
        };
        let Some(email) = self.read_line("Enter member email: ")? else {
            return Ok(());
        };
        match self.catalog.add_member(&name, &email) {
            Ok(member) => writeln!(self.output, "Member added: {}", format_member(&member)),
            Err(err) => self.report_error(&err),
        }
    }

    fn available_books(&mut self) -> io::Result<()> {
        match self.catalog.available_books() {
            Ok(books) if books.is_empty() => writeln!(self.output, "No books available."),
            Ok(books) => {
                for book in &books {
                    writeln!(self.output, "{}", format_book(book))?;
                }
                Ok(())
            }
            Err(err) => self.report_error(&err),
        }
    }

    fn search_books(&mut self) -> io::Result<()> {
        let Some(key) = self.read_line("Enter search key: ")? else {
            return Ok(());
        };
        match self.catalog.search_books(&key) {
            Ok(found) if found.is_empty() => writeln!(self.output, "Not found"),
            Ok(found) => {
                for book in &found {
                    writeln!(self.output, "Found: {}", format_book(book))?;
                }
                Ok(())
            }
            Err(err) => self.report_error(&err),
        }
    }

    fn borrow_details(&mut self) -> io::Result<()> {
        match self.catalog.borrow_details() {
            Ok(details) if details.is_empty() => writeln!(self.output, "No records found."),
            Ok(details) => {
                for detail in &details {
                    writeln!(self.output, "{}", format_detail(detail))?;
                }
                Ok(())
            }
            Err(err) => self.report_error(&err),
        }
    }

    fn delete_unborrowed_books(&mut self) -> io::Result<()> {
        match self.catalog.delete_unborrowed_books() {
            Ok(deleted) => {
                writeln!(self.output, "Deleted books: {}", deleted.len())?;
                for book in &deleted {
                    writeln!(self.output, "  {}", format_book(book))?;
                }
                Ok(())
            }
            Err(err) => self.report_error(&err),
        }
    }

    fn delete_inactive_members(&mut self) -> io::Result<()> {
        match self.catalog.delete_inactive_members() {
            Ok(deleted) => {
                writeln!(self.output, "Deleted members: {}", deleted.len())?;
                for member in &deleted {
                    writeln!(self.output, "  {}", format_member(member))?;
                }
                Ok(())
            }
            Err(err) => self.report_error(&err),
        }
    }

    fn update_stock(&mut self) -> io::Result<()> {
        let Some(title) = self.read_line("Enter book title to update stock: ")? else {
            return Ok(());
        };
        let Some(stock) = self.ask::<i64>("Enter new stock value: ")? else {
            return Ok(());
        };
        match self.catalog.update_stock(&title, stock) {
            Ok(updated) if updated.is_empty() => writeln!(self.output, "Book not found."),
            Ok(updated) => {
                for book in &updated {
                    writeln!(self.output, "Updated stock: {}", format_book(book))?;
                }
                Ok(())
            }
            Err(err) => self.report_error(&err),
        }
    }

    fn update_email(&mut self) -> io::Result<()> {
        let Some(member_id) = self.ask::<MemberId>("Enter member ID to update email: ")? else {
            return Ok(());
        };
        let Some(email) = self.read_line("Enter new email: ")? else {
            return Ok(());
        };
        match self.catalog.update_email(member_id, &email) {
            Ok(member) => writeln!(self.output, "Updated email: {}", format_member(&member)),
            Err(err) => self.report_error(&err),
        }
    }

    fn borrow_book(&mut self) -> io::Result<()> {
        let Some(book_id) = self.ask::<BookId>("Enter book ID to borrow: ")? else {
            return Ok(());
        };
        let Some(member_id) = self.ask::<MemberId>("Enter member ID borrowing the book: ")? else {
            return Ok(());
        };
        match self.circulation.borrow(book_id, member_id) {
            Ok(receipt) => writeln!(
                self.output,
                "Book borrowed successfully. (record #{}, {} left in stock)",
                receipt.record_id, receipt.remaining_stock
            ),
            Err(err) => self.circulation_failed(&err, borrow_failure(&err)),
        }
    }

    fn return_book(&mut self) -> io::Result<()> {
        let Some(book_id) = self.ask::<BookId>("Enter book ID to return: ")? else {
            return Ok(());
        };
        let Some(member_id) = self.ask::<MemberId>("Enter member ID returning the book: ")? else {
            return Ok(());
        };
        match self.circulation.return_book(book_id, member_id) {
            Ok(receipt) => writeln!(
                self.output,
                "Book returned successfully. (record #{}, {} in stock)",
                receipt.record_id, receipt.stock
            ),
            Err(err) => self.circulation_failed(&err, return_failure(&err)),
        }
    }

    fn circulation_failed(&mut self, err: &CirculationError, message: String) -> io::Result<()> {
        writeln!(self.output, "{message}")?;
        if err.is_inconsistent() {
            writeln!(
                self.output,
                "WARNING: stock and borrow records disagree; repair required."
            )?;
        }
        Ok(())
    }

    fn top_books(&mut self) -> io::Result<()> {
        match self.reports.top_books() {
            Ok(rows) if rows.is_empty() => writeln!(self.output, "No records found."),
            Ok(rows) => {
                for row in &rows {
                    writeln!(self.output, "{} → {} borrows", row.title, row.borrow_count)?;
                }
                Ok(())
            }
            Err(err) => self.report_error(&err),
        }
    }

    fn overdue_books(&mut self) -> io::Result<()> {
        match self.reports.overdue() {
            Ok(rows) if rows.is_empty() => writeln!(self.output, "No records found."),
            Ok(rows) => {
                for row in &rows {
                    writeln!(
                        self.output,
                        "{} → {} overdue {} days",
                        row.name, row.title, row.overdue_days
                    )?;
                }
                Ok(())
            }
            Err(err) => self.report_error(&err),
        }
    }

    fn member_totals(&mut self) -> io::Result<()> {
        match self.reports.member_totals() {
            Ok(rows) if rows.is_empty() => writeln!(self.output, "No records found."),
            Ok(rows) => {
                for row in &rows {
                    writeln!(self.output, "{} → total borrowed {}", row.name, row.total_books)?;
                }
                Ok(())
            }
            Err(err) => self.report_error(&err),
        }
    }
}
