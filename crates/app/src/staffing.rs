use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tracing::{info, warn};

use staffbook_core::hierarchy::{HierarchyError, ReportingTree};
use staffbook_core::types::{
    Employee, EmployeeFilter, RecordId, TransactionRecord, TransactionType, TransferPolicy,
};
use staffbook_core::validation::{
    EmployeePatch, NewEmployee, NewTransaction, TransactionPatch, ValidationErrors,
};
use staffbook_storage::{
    Database, DepartmentError, EmployeeError, IdentityError, TransactionError,
};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Executes the HR writes that span several tables, each inside one SQL transaction.
#[derive(Clone)]
pub struct StaffingService {
    database: Database,
    clock: Clock,
    transfer_policy: TransferPolicy,
}

impl StaffingService {
    pub fn new(database: Database, clock: Clock, transfer_policy: TransferPolicy) -> Self {
        Self {
            database,
            clock,
            transfer_policy,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Creates the identity record, the employee and its HIRE entry as one unit.
    pub async fn hire(&self, record: &NewEmployee) -> Result<Employee, StaffingError> {
        let mut errors = ValidationErrors::new();
        self.check_department(&mut errors, "department_id", Some(record.department_id))
            .await?;
        self.check_employee(&mut errors, "manager_id", record.manager_id)
            .await?;
        errors.finish(())?;

        let hired_at = self.now();
        let mut tx = self.database.begin().await?;
        let person_id = self
            .database
            .identities()
            .insert(&mut tx, &record.person)
            .await?;
        let employee_id = self
            .database
            .employees()
            .insert(&mut tx, person_id, record)
            .await?;
        let hire = NewTransaction {
            employee_id,
            transaction_type: TransactionType::Hire,
            previous_department_id: None,
            new_department_id: Some(record.department_id),
            transaction_date: hired_at,
            remarks: None,
        };
        self.append(&mut tx, &hire).await?;
        tx.commit().await?;

        counter!("employees_hired_total").increment(1);
        info!(
            stage = "staffing",
            employee_id,
            department_id = record.department_id,
            "employee hired"
        );

        Ok(self.database.employees().fetch(employee_id).await?)
    }

    /// Applies a partial update to an employee and its identity record.
    ///
    /// Under [`TransferPolicy::Record`] a department change also appends a TRANSFER entry in
    /// the same transaction.
    pub async fn update(
        &self,
        employee_id: RecordId,
        patch: &EmployeePatch,
    ) -> Result<Employee, StaffingError> {
        let mut errors = ValidationErrors::new();
        self.check_department(&mut errors, "department_id", patch.department_id)
            .await?;
        self.check_employee(&mut errors, "manager_id", patch.manager_id.flatten())
            .await?;
        errors.finish(())?;

        let employees = self.database.employees();
        let mut tx = self.database.begin().await?;
        let keys = employees
            .locate(&mut tx, employee_id)
            .await
            .map_err(|err| match err {
                EmployeeError::NotFound => StaffingError::EmployeeNotFound,
                other => other.into(),
            })?;

        self.database
            .identities()
            .update(&mut tx, keys.user_id, &patch.person)
            .await?;
        employees.update(&mut tx, employee_id, patch).await?;

        let transfer_to = patch
            .department_id
            .filter(|department_id| *department_id != keys.department_id)
            .filter(|_| self.transfer_policy.records_transfers());
        if let Some(new_department_id) = transfer_to {
            let transfer = NewTransaction {
                employee_id,
                transaction_type: TransactionType::Transfer,
                previous_department_id: Some(keys.department_id),
                new_department_id: Some(new_department_id),
                transaction_date: self.now(),
                remarks: None,
            };
            self.append(&mut tx, &transfer).await?;
            info!(
                stage = "staffing",
                employee_id,
                from = keys.department_id,
                to = new_department_id,
                "transfer recorded"
            );
        }

        tx.commit().await?;
        Ok(employees.fetch(employee_id).await?)
    }

    /// Points `employee_id` at `manager_id`.
    pub async fn assign_manager(
        &self,
        employee_id: RecordId,
        manager_id: RecordId,
    ) -> Result<Employee, StaffingError> {
        let employees = self.database.employees();
        if !employees.exists(employee_id).await? {
            return Err(StaffingError::EmployeeNotFound);
        }
        if manager_id == employee_id {
            return Err(StaffingError::Validation(ValidationErrors::single(
                "manager_id",
                "An employee cannot be their own manager.",
            )));
        }
        if !employees.exists(manager_id).await? {
            return Err(StaffingError::ManagerNotFound);
        }

        employees
            .set_manager(employee_id, manager_id)
            .await
            .map_err(|err| match err {
                EmployeeError::MissingReference => StaffingError::ManagerNotFound,
                EmployeeError::NotFound => StaffingError::EmployeeNotFound,
                other => other.into(),
            })?;
        info!(stage = "staffing", employee_id, manager_id, "manager assigned");

        Ok(employees.fetch(employee_id).await?)
    }

    /// Returns every transitive report of `root` in pre-order.
    pub async fn hierarchy(&self, root: RecordId) -> Result<Vec<Employee>, StaffingError> {
        let employees = self.database.employees();
        if !employees.exists(root).await? {
            return Err(StaffingError::EmployeeNotFound);
        }

        let tree = ReportingTree::from_edges(employees.manager_edges().await?);
        let ordered = tree.walk(root).map_err(|err| {
            counter!("hierarchy_cycles_total").increment(1);
            warn!(stage = "staffing", root, error = %err, "manager cycle in hierarchy");
            err
        })?;
        if ordered.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_id: std::collections::HashMap<RecordId, Employee> = employees
            .list(&EmployeeFilter::default())
            .await?
            .into_iter()
            .map(|employee| (employee.id, employee))
            .collect();
        Ok(ordered
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect())
    }

    /// Appends a manually entered ledger entry.
    pub async fn record_transaction(
        &self,
        record: &NewTransaction,
    ) -> Result<TransactionRecord, StaffingError> {
        if !self.database.employees().exists(record.employee_id).await? {
            return Err(StaffingError::EmployeeNotFound);
        }
        let mut errors = ValidationErrors::new();
        self.check_department(&mut errors, "previous_department_id", record.previous_department_id)
            .await?;
        self.check_department(&mut errors, "new_department_id", record.new_department_id)
            .await?;
        errors.finish(())?;

        let mut tx = self.database.begin().await?;
        let id = self.append(&mut tx, record).await?;
        tx.commit().await?;

        Ok(self.database.transactions().fetch(id).await?)
    }

    /// Edits an existing ledger entry.
    pub async fn amend_transaction(
        &self,
        id: RecordId,
        patch: &TransactionPatch,
    ) -> Result<TransactionRecord, StaffingError> {
        let mut errors = ValidationErrors::new();
        self.check_department(
            &mut errors,
            "previous_department_id",
            patch.previous_department_id.flatten(),
        )
        .await?;
        self.check_department(
            &mut errors,
            "new_department_id",
            patch.new_department_id.flatten(),
        )
        .await?;
        errors.finish(())?;

        Ok(self.database.transactions().update(id, patch).await?)
    }

    async fn append(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewTransaction,
    ) -> Result<RecordId, StaffingError> {
        let id = self
            .database
            .transactions()
            .insert_in(tx, record)
            .await?;
        counter!(
            "transactions_recorded_total",
            "type" => record.transaction_type.as_str()
        )
        .increment(1);
        Ok(id)
    }

    async fn check_department(
        &self,
        errors: &mut ValidationErrors,
        field: &'static str,
        department_id: Option<RecordId>,
    ) -> Result<(), StaffingError> {
        if let Some(id) = department_id {
            if !self.database.departments().exists(id).await? {
                errors.add(field, invalid_pk(id));
            }
        }
        Ok(())
    }

    async fn check_employee(
        &self,
        errors: &mut ValidationErrors,
        field: &'static str,
        employee_id: Option<RecordId>,
    ) -> Result<(), StaffingError> {
        if let Some(id) = employee_id {
            if !self.database.employees().exists(id).await? {
                errors.add(field, invalid_pk(id));
            }
        }
        Ok(())
    }
}

fn invalid_pk(id: RecordId) -> String {
    format!("Invalid pk \"{id}\" - object does not exist.")
}

/// Errors raised by the staffing executor.
#[derive(Debug, Error)]
pub enum StaffingError {
    #[error("employee not found")]
    EmployeeNotFound,
    #[error("manager not found")]
    ManagerNotFound,
    #[error("{0}")]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Employee(#[from] EmployeeError),
    #[error(transparent)]
    Department(#[from] DepartmentError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
